//! Canned replies rendered with tera.
//!
//! Every business gets the built-in Portuguese bodies below; a row in the
//! template repository with the same key replaces the body for that business.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::warn;

use vendabot_core::domain::account::BusinessAccount;
use vendabot_db::repositories::{RepositoryError, TemplateRepository};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    Greeting,
    Thanks,
    Farewell,
    BusinessHours,
    Delivery,
    HumanHandoff,
    Unknown,
    Apology,
    PaymentReceived,
    SessionReset,
    AbandonedCart,
    PaymentReminder,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 12] = [
        Self::Greeting,
        Self::Thanks,
        Self::Farewell,
        Self::BusinessHours,
        Self::Delivery,
        Self::HumanHandoff,
        Self::Unknown,
        Self::Apology,
        Self::PaymentReceived,
        Self::SessionReset,
        Self::AbandonedCart,
        Self::PaymentReminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Thanks => "thanks",
            Self::Farewell => "farewell",
            Self::BusinessHours => "business_hours",
            Self::Delivery => "delivery",
            Self::HumanHandoff => "human_handoff",
            Self::Unknown => "unknown",
            Self::Apology => "apology",
            Self::PaymentReceived => "payment_received",
            Self::SessionReset => "session_reset",
            Self::AbandonedCart => "abandoned_cart",
            Self::PaymentReminder => "payment_reminder",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|key| key.as_str() == normalized)
    }

    fn default_body(&self) -> &'static str {
        match self {
            Self::Greeting => {
                "Olá! 👋 Bem-vindo(a) à {{ business_name }}. Posso te mostrar o *cardápio*, \
                 montar seu pedido ou acompanhar uma entrega."
            }
            Self::Thanks => "Nós que agradecemos! 😊 Se precisar de algo, é só chamar.",
            Self::Farewell => "Até logo! A {{ business_name }} agradece o contato.",
            Self::BusinessHours => {
                "Nosso atendimento por aqui funciona todos os dias. Pedidos feitos fora do \
                 horário são preparados assim que a {{ business_name }} abrir."
            }
            Self::Delivery => {
                "Entregamos em {{ merchant_city }} e região. Prazo e taxa são confirmados \
                 ao fechar o pedido."
            }
            Self::HumanHandoff => {
                "Certo! Vou chamar alguém da equipe da {{ business_name }} para falar com você."
            }
            Self::Unknown => {
                "Desculpe, não entendi. Você pode pedir o *cardápio*, dizer o que deseja \
                 (ex.: \"2 lasanhas\") ou perguntar sobre o seu *pedido*."
            }
            Self::Apology => {
                "Desculpe, tive um problema para responder agora. Pode tentar de novo em instantes?"
            }
            Self::PaymentReceived => {
                "Obrigado! Recebemos seu aviso de pagamento do pedido #{{ order_number }}. \
                 Assim que confirmarmos, seguimos com o preparo."
            }
            Self::SessionReset => "Pronto, começamos do zero! O que você gostaria hoje?",
            Self::AbandonedCart => {
                "Oi! Seu carrinho na {{ business_name }} ainda está guardado: {{ cart_summary }}. \
                 Total {{ cart_total | brl }}. Quer finalizar o pedido?"
            }
            Self::PaymentReminder => {
                "Lembrete: o pedido #{{ order_number }} aguarda o pagamento de {{ total | brl }}. \
                 PIX copia e cola:\n{{ payment_code }}"
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("template `{key}` failed to render: {message}")]
    Render { key: &'static str, message: String },
}

#[derive(Clone)]
pub struct CannedTemplates {
    overrides: Arc<dyn TemplateRepository>,
    defaults: Arc<Tera>,
}

impl CannedTemplates {
    pub fn new(overrides: Arc<dyn TemplateRepository>) -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        register_filters(&mut tera);
        for key in TemplateKey::ALL {
            tera.add_raw_template(key.as_str(), key.default_body())
                .map_err(|error| TemplateError::Render { key: key.as_str(), message: error.to_string() })?;
        }
        Ok(Self { overrides, defaults: Arc::new(tera) })
    }

    /// Renders `key` for `account`. `business_name` and `merchant_city` are
    /// always in scope. A broken override falls back to the built-in body.
    pub async fn render(
        &self,
        account: &BusinessAccount,
        key: TemplateKey,
        mut context: Context,
    ) -> Result<String, TemplateError> {
        context.insert("business_name", &account.name);
        context.insert("merchant_city", &account.merchant_city);

        if let Some(body) = self.overrides.find(&account.id, key.as_str()).await? {
            match render_override(&body, &context) {
                Ok(text) => return Ok(text),
                Err(error) => warn!(
                    event_name = "automation.template.override_invalid",
                    business_id = %account.id.0,
                    template = key.as_str(),
                    error = %error,
                    "business template override failed, using default"
                ),
            }
        }

        self.defaults
            .render(key.as_str(), &context)
            .map_err(|error| TemplateError::Render { key: key.as_str(), message: error.to_string() })
    }

    pub async fn render_plain(
        &self,
        account: &BusinessAccount,
        key: TemplateKey,
    ) -> Result<String, TemplateError> {
        self.render(account, key, Context::new()).await
    }
}

fn render_override(body: &str, context: &Context) -> Result<String, tera::Error> {
    let mut tera = Tera::default();
    register_filters(&mut tera);
    tera.add_raw_template("override", body)?;
    tera.render("override", context)
}

fn register_filters(tera: &mut Tera) {
    tera.register_filter("brl", brl_filter);
}

/// `{{ total | brl }}` renders `R$ 1.234,50`. Accepts decimal strings and numbers.
fn brl_filter(value: &tera::Value, _: &HashMap<String, tera::Value>) -> tera::Result<tera::Value> {
    let raw = match value {
        tera::Value::String(text) => text.clone(),
        tera::Value::Number(number) => number.to_string(),
        _ => return Err(tera::Error::msg("brl filter expects a number or decimal string")),
    };
    let amount = Decimal::from_str(raw.trim())
        .map_err(|error| tera::Error::msg(format!("brl filter: `{raw}` is not a decimal ({error})")))?;
    Ok(tera::Value::String(format_brl(amount)))
}

pub fn format_brl(amount: Decimal) -> String {
    let fixed = format!("{:.2}", amount.round_dp(2).abs());
    let (integer, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let digits: Vec<char> = integer.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.iter().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*digit);
    }

    let sign = if amount.is_sign_negative() && !amount.is_zero() { "-" } else { "" };
    format!("{sign}R$ {grouped},{cents}")
}
