//! Static PIX "copia e cola" payloads (EMV merchant-presented QR format).

use rust_decimal::Decimal;
use thiserror::Error;

use crate::text::fold;

const GUI: &str = "br.gov.bcb.pix";
const MAX_NAME: usize = 25;
const MAX_CITY: usize = 15;
const MAX_TXID: usize = 25;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PixError {
    #[error("pix key is empty")]
    EmptyKey,
    #[error("pix amount must be positive, got {0}")]
    InvalidAmount(Decimal),
    #[error("pix field `{0}` exceeds 99 characters")]
    FieldTooLong(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixPayload {
    pub key: String,
    pub merchant_name: String,
    pub merchant_city: String,
    pub amount: Decimal,
    pub txid: String,
}

impl PixPayload {
    pub fn encode(&self) -> Result<String, PixError> {
        let key = self.key.trim();
        if key.is_empty() {
            return Err(PixError::EmptyKey);
        }
        if self.amount <= Decimal::ZERO {
            return Err(PixError::InvalidAmount(self.amount));
        }

        let account = [field("00", GUI, "gui")?, field("01", key, "key")?].concat();
        let txid = sanitize_txid(&self.txid);
        let mut payload = [
            field("00", "01", "format")?,
            field("26", &account, "merchant_account")?,
            field("52", "0000", "category")?,
            field("53", "986", "currency")?,
            field("54", &format!("{:.2}", self.amount.round_dp(2)), "amount")?,
            field("58", "BR", "country")?,
            field("59", &ascii_upper(&self.merchant_name, MAX_NAME), "merchant_name")?,
            field("60", &ascii_upper(&self.merchant_city, MAX_CITY), "merchant_city")?,
            field("62", &field("05", &txid, "txid")?, "additional_data")?,
        ]
        .concat();

        payload.push_str("6304");
        let checksum = crc16_ccitt(payload.as_bytes());
        payload.push_str(&format!("{checksum:04X}"));
        Ok(payload)
    }
}

fn field(id: &str, value: &str, name: &'static str) -> Result<String, PixError> {
    let length = value.chars().count();
    if length > 99 {
        return Err(PixError::FieldTooLong(name));
    }
    Ok(format!("{id}{length:02}{value}"))
}

fn ascii_upper(value: &str, max: usize) -> String {
    fold(value)
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == ' ')
        .take(max)
        .collect::<String>()
        .trim()
        .to_ascii_uppercase()
}

fn sanitize_txid(value: &str) -> String {
    let txid: String = value.chars().filter(char::is_ascii_alphanumeric).take(MAX_TXID).collect();
    if txid.is_empty() {
        "***".to_string()
    } else {
        txid
    }
}

/// CRC-16/CCITT-FALSE as required by BR Code.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{crc16_ccitt, PixError, PixPayload};

    fn payload() -> PixPayload {
        PixPayload {
            key: "nona@example.com".to_string(),
            merchant_name: "Cantina da Nona Ltda".to_string(),
            merchant_city: "São Paulo".to_string(),
            amount: Decimal::new(6980, 2),
            txid: "VB-482913".to_string(),
        }
    }

    #[test]
    fn crc_matches_reference_check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn encodes_fields_and_valid_checksum() {
        let code = payload().encode().expect("payload should encode");

        assert!(code.starts_with("000201"));
        assert!(code.contains("0014br.gov.bcb.pix0116nona@example.com"));
        assert!(code.contains("540569.80"));
        assert!(code.contains("5909SAO PAULO") || code.contains("6009SAO PAULO"));
        assert!(code.contains("62120508VB482913"));

        let (body, checksum) = code.split_at(code.len() - 4);
        assert!(body.ends_with("6304"));
        assert_eq!(checksum, format!("{:04X}", crc16_ccitt(body.as_bytes())));
    }

    #[test]
    fn rejects_missing_key_and_non_positive_amount() {
        let mut missing_key = payload();
        missing_key.key = "  ".to_string();
        assert_eq!(missing_key.encode(), Err(PixError::EmptyKey));

        let mut zero = payload();
        zero.amount = Decimal::ZERO;
        assert_eq!(zero.encode(), Err(PixError::InvalidAmount(Decimal::ZERO)));
    }
}
