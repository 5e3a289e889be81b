/// Lowercases and strips Portuguese diacritics so `Cardápio` matches `cardapio`.
pub fn fold(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|ch| match ch {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Splits folded text into alphanumeric tokens.
pub fn tokens(text: &str) -> Vec<String> {
    fold(text)
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{fold, tokens};

    #[test]
    fn fold_strips_accents_and_case() {
        assert_eq!(fold("Cardápio de AÇAÍ"), "cardapio de acai");
        assert_eq!(fold("Não, obrigado!"), "nao, obrigado!");
    }

    #[test]
    fn tokens_drop_punctuation() {
        assert_eq!(tokens("Quero 2, rondelli!"), vec!["quero", "2", "rondelli"]);
    }
}
