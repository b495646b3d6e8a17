use hex::encode;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use sha2::Sha256;
use std::env::var;

/// Request signing secret from the environment; takes precedence over config.
pub static ENV_SECRET: Lazy<Option<String>> =
    Lazy::new(|| var("LANEGATE_OCR_SECRET").ok().filter(|s| !s.is_empty()));

/// Hex HMAC-SHA256 of `uri`, sent alongside recognizer requests.
pub fn compute_hmac(secret: &str, uri: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(uri.as_bytes());

    encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_depends_on_secret_and_uri() {
        let sig = compute_hmac("secret", "https://ocr.local/ocr");

        assert_eq!(sig.len(), 64);
        assert_eq!(sig, compute_hmac("secret", "https://ocr.local/ocr"));
        assert_ne!(sig, compute_hmac("other", "https://ocr.local/ocr"));
        assert_ne!(sig, compute_hmac("secret", "https://ocr.local/x"));
    }
}
