use regex::Regex;

use crate::domain::intent::{Intent, IntentEntities};
use crate::text::tokens;

const MAX_PRODUCT_WORDS: usize = 3;

const QUANTITY_FILLERS: &[&str] = &["x", "un", "und", "unid", "unidade", "unidades"];
const ARTICLES: &[&str] = &["o", "a", "os", "as", "um", "uma", "uns", "umas", "mais", "de", "do", "da"];
const STOP_WORDS: &[&str] = &[
    "por", "favor", "pfv", "pf", "pls", "e", "pra", "para", "obrigado", "obrigada", "agora", "hoje",
];
const CART_VERBS: &[&str] = &[
    "adiciona", "adicionar", "adicione", "coloca", "colocar", "coloque", "inclui", "incluir",
    "bota", "botar", "quero", "queria", "manda", "comprar", "pedir",
];
const PRICE_WORDS: &[&str] = &["custa", "preco", "valor", "fica", "sai"];

pub(crate) fn extract(intent: Intent, text: &str, order_number: &Regex) -> IntentEntities {
    let words = tokens(text);
    let mut entities = IntentEntities::default();

    match intent {
        Intent::AddToCart => {
            if let Some((quantity, product)) = quantity_and_product(&words) {
                entities.quantity = Some(quantity);
                entities.product = product;
            } else if let Some(product) = product_after(&words, CART_VERBS) {
                entities.quantity = Some(1);
                entities.product = Some(product);
            }
        }
        // "fechar o pedido" carries no product; only an explicit quantity does.
        Intent::CreateOrder => {
            if let Some((quantity, product)) = quantity_and_product(&words) {
                entities.quantity = Some(quantity);
                entities.product = product;
            }
        }
        Intent::PriceCheck => {
            entities.product = product_after(&words, PRICE_WORDS);
        }
        Intent::TrackOrder | Intent::CancelOrder => {
            let folded = crate::text::fold(text);
            entities.order_number = order_number
                .captures(&folded)
                .and_then(|captures| captures.get(1))
                .map(|value| value.as_str().to_string());
        }
        _ => {}
    }

    entities
}

/// First integer token plus up to three following words.
fn quantity_and_product(words: &[String]) -> Option<(u32, Option<String>)> {
    let (index, quantity) = words.iter().enumerate().find_map(|(index, word)| {
        word.parse::<u32>().ok().filter(|value| *value > 0).map(|value| (index, value))
    })?;

    let rest = words[index + 1..]
        .iter()
        .skip_while(|word| QUANTITY_FILLERS.contains(&word.as_str()));
    Some((quantity, collect_product(rest)))
}

fn product_after(words: &[String], anchors: &[&str]) -> Option<String> {
    let index = words.iter().position(|word| anchors.contains(&word.as_str()))?;
    let rest = words[index + 1..].iter().skip_while(|word| ARTICLES.contains(&word.as_str()));
    collect_product(rest)
}

fn collect_product<'a>(words: impl Iterator<Item = &'a String>) -> Option<String> {
    let product: Vec<&str> = words
        .map(String::as_str)
        .take_while(|word| !STOP_WORDS.contains(word) && word.parse::<u32>().is_err())
        .take(MAX_PRODUCT_WORDS)
        .collect();

    if product.is_empty() {
        None
    } else {
        Some(product.join(" "))
    }
}
