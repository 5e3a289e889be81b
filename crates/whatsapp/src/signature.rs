use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,
    #[error("signature header must be `sha256=<hex>`")]
    Malformed,
    #[error("signature does not match payload")]
    Mismatch,
    #[error("app secret is not configured")]
    NoSecret,
}

/// Checks `X-Hub-Signature-256` against the raw request body.
pub fn verify(app_secret: &[u8], header: Option<&str>, body: &[u8]) -> Result<(), SignatureError> {
    if app_secret.is_empty() {
        return Err(SignatureError::NoSecret);
    }
    let header = header.map(str::trim).filter(|value| !value.is_empty()).ok_or(SignatureError::Missing)?;
    let digest = header.strip_prefix("sha256=").ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(digest.trim()).map_err(|_| SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(app_secret).map_err(|_| SignatureError::NoSecret)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Produces the header value the provider would send for `body`.
pub fn sign(app_secret: &[u8], body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(app_secret).map_err(|_| SignatureError::NoSecret)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::{sign, verify, SignatureError};

    const SECRET: &[u8] = b"app-secret";
    const BODY: &[u8] = br#"{"object":"whatsapp_business_account","entry":[]}"#;

    #[test]
    fn accepts_matching_signature() {
        let header = sign(SECRET, BODY).expect("sign");
        assert!(header.starts_with("sha256="));
        assert_eq!(verify(SECRET, Some(&header), BODY), Ok(()));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let header = sign(SECRET, BODY).expect("sign");
        assert_eq!(verify(SECRET, Some(&header), b"{}"), Err(SignatureError::Mismatch));
        assert_eq!(verify(b"other", Some(&header), BODY), Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_missing_or_malformed_headers() {
        assert_eq!(verify(SECRET, None, BODY), Err(SignatureError::Missing));
        assert_eq!(verify(SECRET, Some("  "), BODY), Err(SignatureError::Missing));
        assert_eq!(verify(SECRET, Some("md5=abcd"), BODY), Err(SignatureError::Malformed));
        assert_eq!(verify(SECRET, Some("sha256=zz"), BODY), Err(SignatureError::Malformed));
        assert_eq!(verify(b"", Some("sha256=00"), BODY), Err(SignatureError::NoSecret));
    }
}
