use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusinessId(pub String);

/// A merchant connected to the messaging provider.
///
/// `phone_number_id` is the provider's primary routing identifier. The display
/// number and workspace (WABA) id are fallbacks used when the provider rotates
/// the primary id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessAccount {
    pub id: BusinessId,
    pub name: String,
    pub phone_number_id: String,
    pub display_phone_number: String,
    pub workspace_id: Option<String>,
    pub pix_key: Option<String>,
    pub merchant_city: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How an inbound event's account was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountMatch {
    PhoneNumberId,
    DisplayNumber,
    WorkspaceId,
}

impl AccountMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhoneNumberId => "phone_number_id",
            Self::DisplayNumber => "display_number",
            Self::WorkspaceId => "workspace_id",
        }
    }
}

impl BusinessAccount {
    /// Returns the identifiers that should be rewritten when the account was
    /// found through a fallback and the provider reports a different primary id.
    pub fn heal_identifiers(
        &self,
        matched_by: AccountMatch,
        phone_number_id: &str,
        display_phone_number: Option<&str>,
    ) -> Option<BusinessAccount> {
        if matched_by == AccountMatch::PhoneNumberId || phone_number_id.trim().is_empty() {
            return None;
        }
        if self.phone_number_id == phone_number_id {
            return None;
        }

        let mut healed = self.clone();
        healed.phone_number_id = phone_number_id.to_string();
        if let Some(display) = display_phone_number.filter(|value| !value.trim().is_empty()) {
            healed.display_phone_number = display.to_string();
        }
        Some(healed)
    }
}

/// Keeps only digits so `+55 (11) 99999-0000` and `5511999990000` compare equal.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}
