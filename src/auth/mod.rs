//! Auth Arbiter: the platform API key (one per installation, presented as
//! `X-API-Key` by humans and the CLI), deploy keys (scoped, revocable
//! tokens for CI pipelines), and webhook signature verification (HMAC over
//! the raw request body, for both inbound push webhooks and the
//! self-update channel).

pub mod deploy_keys;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::{write_private_file, Home};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("missing X-API-Key header")]
    MissingApiKey,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("invalid webhook signature")]
    InvalidSignature,
}

/// Reads the platform key, generating and persisting one (mode 600) on
/// first use. There is exactly one platform key per installation; it has
/// no expiry and no rotation mechanism — replacing it means deleting the
/// file and letting this regenerate it.
pub fn get_or_create_api_key(home: &Home) -> Result<String, AuthError> {
    let path = home.api_key_path();
    if path.exists() {
        return Ok(std::fs::read_to_string(&path)?.trim().to_string());
    }
    let key = generate_token();
    write_private_file(&path, key.as_bytes())?;
    Ok(key)
}

fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Constant-time comparison of the presented key's digest against the
/// stored key's digest — comparing digests rather than the raw strings
/// keeps both sides a fixed 32 bytes regardless of the caller's input
/// length.
pub fn verify_api_key(presented: &str, expected: &str) -> bool {
    let presented_digest = Sha256::digest(presented.as_bytes());
    let expected_digest = Sha256::digest(expected.as_bytes());
    presented_digest.ct_eq(&expected_digest).into()
}

type HmacSha256 = Hmac<Sha256>;

/// Computes `sha256=<hex>` the way GitHub (and this control plane's own
/// outbound sender) signs a webhook body.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a `X-Hub-Signature-256`-style header against the raw body and
/// secret, in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let expected = sign_body(secret, body);
    expected.as_bytes().ct_eq(signature_header.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_api_key_accepts_matching_and_rejects_mismatched() {
        assert!(verify_api_key("abc", "abc"));
        assert!(!verify_api_key("abc", "abd"));
        assert!(!verify_api_key("abc", "abcd"));
    }

    #[test]
    fn signature_round_trips() {
        let sig = sign_body("s3cr3t", b"payload");
        assert!(verify_signature("s3cr3t", b"payload", &sig));
        assert!(!verify_signature("s3cr3t", b"tampered", &sig));
        assert!(!verify_signature("wrong", b"payload", &sig));
    }

    #[test]
    fn generated_tokens_are_reasonably_long_and_url_safe() {
        let token = generate_token();
        assert!(token.len() >= 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
