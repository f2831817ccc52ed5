//! HMAC-SHA256 webhook signatures.
//!
//! The sender signs the raw request body with the shared secret and puts the
//! base64 digest in one of [`SIGNATURE_HEADERS`], optionally prefixed with
//! `sha256=` or `v1,`.

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADERS: [&str; 2] = ["x-meetsync-signature", "x-webhook-signature"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("signature is not valid base64")]
    Malformed,
    #[error("signature does not match")]
    Mismatch,
    #[error("signing secret is unusable")]
    InvalidKey,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    mac: HmacSha256,
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Result<Self, SignatureError> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Base64 signature for `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, body: &[u8], headers: &HeaderMap) -> Result<(), SignatureError> {
        let provided = SIGNATURE_HEADERS
            .iter()
            .find_map(|name| headers.get(*name))
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(SignatureError::Missing)?;

        let encoded = provided
            .strip_prefix("sha256=")
            .or_else(|| provided.strip_prefix("v1,"))
            .unwrap_or(provided);
        let signature = STANDARD
            .decode(encoded)
            .map_err(|_| SignatureError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(body);
        mac.verify_slice(&signature)
            .map_err(|_| SignatureError::Mismatch)
    }
}
