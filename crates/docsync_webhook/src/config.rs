//! Listener configuration.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for inbound event handling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared signing secret. Without one, signatures are not checked.
    pub secret: Option<String>,
    /// Accepted clock skew between the signed timestamp and now.
    #[serde(rename = "tolerance_secs", deserialize_with = "secs")]
    pub tolerance: Duration,
    /// Folder for entities that have no registry yet.
    pub default_folder: String,
}

fn secs<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl WebhookConfig {
    /// Creates a configuration without a secret.
    pub fn new() -> Self {
        Self {
            secret: None,
            tolerance: Duration::from_secs(5 * 60),
            default_folder: "docs".into(),
        }
    }

    /// Sets the shared signing secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// Sets the accepted clock skew.
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the folder used for unknown entities.
    pub fn with_default_folder(mut self, folder: impl Into<String>) -> Self {
        self.default_folder = folder.into();
        self
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = WebhookConfig::default();
        assert!(config.secret.is_none());
        assert_eq!(config.tolerance, Duration::from_secs(300));
        assert_eq!(config.default_folder, "docs");
    }

    #[test]
    fn empty_secret_disables_verification() {
        assert!(WebhookConfig::new().with_secret("").secret.is_none());
        assert_eq!(
            WebhookConfig::new().with_secret("s3cret").secret.as_deref(),
            Some("s3cret")
        );
    }

    #[test]
    fn config_from_json() {
        let config: WebhookConfig =
            serde_json::from_str(r#"{"secret": "abc", "tolerance_secs": 60}"#).unwrap();
        assert_eq!(config.secret.as_deref(), Some("abc"));
        assert_eq!(config.tolerance, Duration::from_secs(60));
        assert_eq!(config.default_folder, "docs");
    }
}
