//! Signature verification for inbound events.
//!
//! ## Signature Format
//!
//! The sender signs the concatenation of the timestamp header (Unix
//! seconds, as sent) and the raw body with HMAC-SHA256 using the shared
//! secret. The signature header carries the lowercase hex digest,
//! optionally prefixed with `sha256=`.

use crate::config::WebhookConfig;
use crate::error::{WebhookError, WebhookResult};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Checks event signatures against the shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<Vec<u8>>,
    tolerance: Duration,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("enabled", &self.is_enabled())
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl SignatureVerifier {
    /// Creates a verifier from the listener configuration.
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            secret: config.secret.as_ref().map(|s| s.as_bytes().to_vec()),
            tolerance: config.tolerance,
        }
    }

    /// Returns false when no secret is configured.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Computes the hex signature for a timestamp and body.
    ///
    /// Returns `None` when no secret is configured.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Option<String> {
        let mac = self.mac(timestamp, body)?;
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verifies a request against the current time.
    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> WebhookResult<()> {
        self.verify_at(timestamp, signature, body, Utc::now())
    }

    /// Verifies a request as if it arrived at `now`.
    ///
    /// Without a secret every request passes.
    pub fn verify_at(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> WebhookResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let timestamp = timestamp.ok_or(WebhookError::MissingTimestamp)?.trim();
        let signature = signature.ok_or(WebhookError::MissingSignature)?.trim();

        let sent: i64 = timestamp
            .parse()
            .map_err(|_| WebhookError::InvalidTimestamp(timestamp.to_string()))?;
        let skew_secs = sent.saturating_sub(now.timestamp());
        if skew_secs.unsigned_abs() > self.tolerance.as_secs() {
            return Err(WebhookError::StaleTimestamp { skew_secs });
        }

        let digest = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
        let expected = hex::decode(digest).map_err(|_| WebhookError::InvalidSignature)?;
        let mac = self
            .mac(timestamp, body)
            .ok_or(WebhookError::InvalidSignature)?;
        mac.verify_slice(&expected)
            .map_err(|_| WebhookError::InvalidSignature)
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Option<HmacSha256> {
        let secret = self.secret.as_deref()?;
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(body);
        Some(mac)
    }
}
