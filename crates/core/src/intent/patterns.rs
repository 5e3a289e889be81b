use crate::domain::intent::Intent;

/// Ordered intent table, matched against folded text. Transactional intents
/// come first so "oi, quero cancelar meu pedido" is a cancellation.
pub(crate) const INTENT_PATTERNS: &[(Intent, &[&str])] = &[
    (
        Intent::CancelOrder,
        &[
            r"\bcancel(ar|a|e|o|ei|amento)\b",
            r"\bdesist(o|i|ir)\b",
            r"\bnao\s+quero\s+mais\s+(o\s+|meu\s+|esse\s+|este\s+)?(pedido|compra)\b",
        ],
    ),
    (
        Intent::TrackOrder,
        &[
            r"\b(onde\s+esta|cade|rastre\w*|status|acompanh\w*|situacao)\b.{0,30}\bpedido\b",
            r"\bpedido\b\D{0,8}\d{4,10}\b",
            r"\b(quando\s+chega|ja\s+saiu|vai\s+demorar|esta\s+chegando)\b",
        ],
    ),
    (
        Intent::CreateOrder,
        &[
            r"\b(fechar|finalizar|confirmar|concluir)\b.{0,20}\b(pedido|compra)\b",
            r"\b(fazer|quero|gostaria\s+de\s+fazer)\s+(um\s+|o\s+|meu\s+)?pedido\b",
            r"^\s*(finalizar|fechar|pode\s+fechar|fechou)\s*[.!]?\s*$",
            r"\bquero\s+pedir\s*[.!]?\s*$",
        ],
    ),
    (
        Intent::AddToCart,
        &[
            r"(^|[.!?,;]\s*)\d{1,3}\s*(x\s*)?[a-z]{3,}",
            r"\b(adiciona|adicionar|adicione|coloca|colocar|coloque|inclui|incluir|bota|botar)\b",
            r"\b(quero|queria|manda|me\s+ve|comprar|pedir)\s+(mais\s+)?\d{1,3}\b",
        ],
    ),
    (
        Intent::ViewCart,
        &[r"\bcarrinho\b", r"\bo\s+que\s+(eu\s+)?(ja\s+)?pedi\b", r"\bmeus\s+itens\b"],
    ),
    (
        Intent::PaymentInfo,
        &[
            r"\bpix\b",
            r"\b(pagamento|pagar|pago|cartao|boleto|dinheiro)\b",
            r"\bformas?\s+de\s+pag\w*",
        ],
    ),
    (
        Intent::PriceCheck,
        &[r"\bquanto\s+(custa|e|fica|sai|esta|ta)\b", r"\b(preco|precos|valor|valores)\b"],
    ),
    (
        Intent::Catalog,
        &[
            r"\b(cardapio|catalogo|menu|produtos|opcoes)\b",
            r"\bo\s+que\s+(voces\s+)?(tem|vendem|oferecem)\b",
        ],
    ),
    (
        Intent::BusinessHours,
        &[
            r"\b(horario|horarios|funcionamento|aberto|aberta)\b",
            r"\b(que\s+horas|ate\s+que\s+horas)\b",
            r"\b(abre|abrem|fecha|fecham)\b",
        ],
    ),
    (
        Intent::Delivery,
        &[r"\b(entrega|entregam|entregar|frete|delivery|motoboy)\b", r"\btaxa\s+de\s+entrega\b"],
    ),
    (
        Intent::HumanHandoff,
        &[
            r"\b(atendente|humano|gerente|responsavel)\b",
            r"\bfalar\s+com\s+(alguem|uma\s+pessoa|voce)\b",
        ],
    ),
    (Intent::Thanks, &[r"\b(obrigad[oa]|valeu|agradec\w*|brigad[oa])\b"]),
    (Intent::Farewell, &[r"\b(tchau|ate\s+(logo|mais|amanha|breve)|falou|bye)\b"]),
    (
        Intent::Greeting,
        &[r"^\s*(oi+|ola|opa|eai|e\s+ai|bom\s+dia|boa\s+tarde|boa\s+noite|hello|hey|hi)\b"],
    ),
];

/// Messages that need open-ended reasoning rather than a canned answer.
pub(crate) const DEEP_REASONING_PATTERNS: &[&str] = &[
    r"\bpor\s+que\b",
    r"\b(diferenca|comparar|compara|comparacao|versus)\b",
    r"\b(melhor|pior)\s+(opcao|prato|produto|escolha|sabor)\b",
    r"\b(recomenda|sugere|sugestao|indica)\w*",
    r"\b(personaliz|substitu)\w*",
    r"\btrocar\s+o\b",
    r"\bsem\s+(cebola|gluten|lactose|pimenta|sal|acucar|carne)\b",
    r"\b(alergi|intoleran|vegan|vegetarian)\w*",
];

pub(crate) const ORDER_NUMBER_PATTERN: &str = r"(?:pedido|numero|#)\D{0,8}(\d{4,10})\b";
