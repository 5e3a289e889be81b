//! Deterministic keys that make redelivered webhooks and reprocessed messages
//! collapse onto the records they already produced.

use crate::domain::webhook_event::EventKind;

/// Key for one webhook sub-event: kind, provider message id, status and
/// provider timestamp. Two deliveries of the same sub-event hash identically.
pub fn event_key(
    kind: EventKind,
    provider_message_id: Option<&str>,
    status: Option<&str>,
    timestamp: Option<&str>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [
        kind.as_str(),
        provider_message_id.unwrap_or_default(),
        status.unwrap_or_default(),
        timestamp.unwrap_or_default(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    format!("evt_{}", hasher.finalize().to_hex())
}

/// Key for the order a given inbound message may create.
pub fn order_key(business_id: &str, provider_message_id: &str) -> String {
    let hash = blake3::hash(format!("order|{business_id}|{provider_message_id}").as_bytes());
    format!("ord_{}", hash.to_hex())
}

/// Six-digit customer-facing order number derived from the order key. A
/// non-zero `attempt` salts the hash to step past a number already taken.
pub fn order_number(order_key: &str, attempt: u32) -> String {
    let hash = match attempt {
        0 => blake3::hash(order_key.as_bytes()),
        n => blake3::hash(format!("{order_key}#{n}").as_bytes()),
    };
    let bytes = hash.as_bytes();
    let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % 900_000 + 100_000;
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::{event_key, order_key, order_number};
    use crate::domain::webhook_event::EventKind;

    #[test]
    fn event_key_is_stable_and_sensitive_to_each_part() {
        let base = event_key(EventKind::Status, Some("wamid.1"), Some("read"), Some("1700000000"));
        assert_eq!(
            base,
            event_key(EventKind::Status, Some("wamid.1"), Some("read"), Some("1700000000"))
        );
        assert_ne!(
            base,
            event_key(EventKind::Status, Some("wamid.1"), Some("delivered"), Some("1700000000"))
        );
        assert_ne!(
            base,
            event_key(EventKind::Message, Some("wamid.1"), Some("read"), Some("1700000000"))
        );
        assert!(base.starts_with("evt_"));
    }

    #[test]
    fn order_number_is_six_digits_and_deterministic() {
        let key = order_key("biz-1", "wamid.abc");
        let number = order_number(&key, 0);
        assert_eq!(number.len(), 6);
        assert_eq!(number, order_number(&order_key("biz-1", "wamid.abc"), 0));
        assert_ne!(key, order_key("biz-2", "wamid.abc"));
        let salted = order_number(&key, 1);
        assert_eq!(salted.len(), 6);
        assert_ne!(salted, number);
        assert_eq!(salted, order_number(&key, 1));
    }
}
