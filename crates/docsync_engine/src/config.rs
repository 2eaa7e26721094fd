//! Configuration for the sync engine.

use crate::error::{EngineError, EngineResult};
use docsync_core::{EntityId, EntityKind};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Serde adapter for durations written as milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer};
        use std::time::Duration;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

/// A configured root entity and the folder its tree is written to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RootConfig {
    /// Root entity id.
    pub id: EntityId,
    /// Content folder.
    pub folder: String,
    /// Page or database. Overrides the kind the remote reports, so a
    /// database root is always listed by rows.
    #[serde(default)]
    pub kind: EntityKind,
    /// Disabled roots and everything below them are neither pulled nor
    /// synced, and cleanup sweeps their files.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RootConfig {
    /// Creates an enabled page root.
    pub fn new(id: impl Into<EntityId>, folder: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            folder: folder.into(),
            kind: EntityKind::Page,
            enabled: true,
        }
    }

    /// Marks the root as a database.
    #[must_use]
    pub fn database(mut self) -> Self {
        self.kind = EntityKind::Database;
        self
    }

    /// Enables or disables the root.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

fn default_true() -> bool {
    true
}

/// Exhaustion limits for one sync run. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncLimits {
    /// Maximum entities fetched from the remote.
    pub max_entities: Option<u64>,
    /// Maximum markup and asset files written.
    pub max_files: Option<u64>,
    /// Maximum queue records fully consumed.
    pub max_records: Option<u64>,
    /// Maximum wall-clock duration.
    #[serde(rename = "max_duration_ms", with = "millis::option")]
    pub max_duration: Option<Duration>,
}

impl SyncLimits {
    /// Creates unlimited limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entity limit.
    #[must_use]
    pub fn with_max_entities(mut self, n: u64) -> Self {
        self.max_entities = Some(n);
        self
    }

    /// Sets the file limit.
    #[must_use]
    pub fn with_max_files(mut self, n: u64) -> Self {
        self.max_files = Some(n);
        self
    }

    /// Sets the record limit.
    #[must_use]
    pub fn with_max_records(mut self, n: u64) -> Self {
        self.max_records = Some(n);
        self
    }

    /// Sets the duration limit.
    #[must_use]
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Request rate limiting and rate-limit backoff for remote calls.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    pub requests_per_second: f64,
    /// Requests allowed in a burst.
    pub burst: u32,
    /// Retries after a rate-limited or transient failure.
    pub max_retries: u32,
    /// First backoff; doubled on every further retry.
    #[serde(rename = "initial_backoff_ms", with = "millis")]
    pub initial_backoff: Duration,
    /// Upper bound for a single backoff.
    #[serde(rename = "max_backoff_ms", with = "millis")]
    pub max_backoff: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 3.0,
            burst: 3,
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Creates the default rate limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sustained rate and burst size.
    #[must_use]
    pub fn with_rate(mut self, requests_per_second: f64, burst: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self.burst = burst;
        self
    }

    /// Sets the retry bound and initial backoff.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    /// Backoff before retry number `retry` (1-indexed), doubling each time.
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Background worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Quiet period after a wake-up before a pass starts.
    #[serde(rename = "debounce_ms", with = "millis")]
    pub debounce: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// Sets the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Configuration for a [`crate::SyncEngine`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Folder for entities discovered outside any root.
    pub default_folder: String,
    /// Configured roots.
    pub roots: Vec<RootConfig>,
    /// Query passed to the remote search during pull.
    pub search_query: String,
    /// Maximum nesting fetched below an entity; `None` for unlimited.
    pub max_depth: Option<usize>,
    /// Maximum missing ancestors fetched before an entity.
    pub max_ancestor_depth: usize,
    /// Directory, relative to the folder, that holds downloaded assets.
    pub asset_dir: String,
    /// Exhaustion limits for sync runs.
    pub limits: SyncLimits,
    /// Retry policy for pushes.
    pub push_retry: RetryConfig,
    /// Remote request throttling.
    pub rate_limit: RateLimitConfig,
    /// Background worker settings.
    pub worker: WorkerConfig,
    /// Units of work between checkpoint commits during a pass.
    pub checkpoint_every: u64,
    /// Push after every pass that committed something.
    pub push_after_pass: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_folder: "docs".into(),
            roots: Vec::new(),
            search_query: String::new(),
            max_depth: None,
            max_ancestor_depth: 16,
            asset_dir: "assets".into(),
            limits: SyncLimits::default(),
            push_retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            worker: WorkerConfig::default(),
            checkpoint_every: 25,
            push_after_pass: true,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration. Missing fields take default values.
    pub fn from_json(bytes: &[u8]) -> EngineResult<Self> {
        let config: Self =
            serde_json::from_slice(bytes).map_err(|e| EngineError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| EngineError::config(format!("{}: {e}", path.display())))?;
        Self::from_json(&bytes)
    }

    /// Checks folder names and intervals.
    pub fn validate(&self) -> EngineResult<()> {
        for folder in std::iter::once(&self.default_folder).chain(self.roots.iter().map(|r| &r.folder)) {
            let normalized = docsync_store::normalize_path(folder)
                .map_err(|e| EngineError::config(e.to_string()))?;
            if normalized.starts_with(docsync_core::BOOKKEEPING_DIR) {
                return Err(EngineError::config(format!(
                    "folder {folder:?} overlaps the bookkeeping directory"
                )));
            }
        }
        if self.checkpoint_every == 0 {
            return Err(EngineError::config("checkpoint_every must be positive"));
        }
        if self.rate_limit.requests_per_second <= 0.0 {
            return Err(EngineError::config("requests_per_second must be positive"));
        }
        Ok(())
    }

    /// Adds a root.
    #[must_use]
    pub fn with_root(mut self, root: RootConfig) -> Self {
        self.roots.push(root);
        self
    }

    /// Sets the default folder.
    #[must_use]
    pub fn with_default_folder(mut self, folder: impl Into<String>) -> Self {
        self.default_folder = folder.into();
        self
    }

    /// Sets the sync limits.
    #[must_use]
    pub fn with_limits(mut self, limits: SyncLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the push retry policy.
    #[must_use]
    pub fn with_push_retry(mut self, retry: RetryConfig) -> Self {
        self.push_retry = retry;
        self
    }

    /// Sets the remote rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sets the tree depth cap.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Sets the checkpoint interval.
    #[must_use]
    pub fn with_checkpoint_every(mut self, units: u64) -> Self {
        self.checkpoint_every = units;
        self
    }

    /// Enables or disables pushing after a pass.
    #[must_use]
    pub fn with_push_after_pass(mut self, push: bool) -> Self {
        self.push_after_pass = push;
        self
    }

    /// Returns the configured root with `id`.
    #[must_use]
    pub fn root(&self, id: &EntityId) -> Option<&RootConfig> {
        self.roots.iter().find(|r| &r.id == id)
    }

    /// Returns true if `id` is a configured root that is disabled.
    #[must_use]
    pub fn is_disabled_root(&self, id: &EntityId) -> bool {
        self.root(id).is_some_and(|r| !r.enabled)
    }

    /// Every folder content may be written to.
    #[must_use]
    pub fn folders(&self) -> Vec<String> {
        let mut folders: Vec<String> = std::iter::once(self.default_folder.clone())
            .chain(self.roots.iter().map(|r| r.folder.clone()))
            .collect();
        folders.sort();
        folders.dedup();
        folders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new()
            .with_default_folder("inbox")
            .with_root(RootConfig::new("R-1", "wiki"))
            .with_limits(SyncLimits::new().with_max_entities(10))
            .with_checkpoint_every(5);

        assert_eq!(config.default_folder, "inbox");
        assert_eq!(config.root(&EntityId::new("r1")).unwrap().folder, "wiki");
        assert_eq!(config.limits.max_entities, Some(10));
        assert_eq!(config.folders(), vec!["inbox".to_string(), "wiki".to_string()]);
    }

    #[test]
    fn config_from_json_fills_defaults() {
        let json = br#"{
            "default_folder": "notes",
            "roots": [{"id": "AB-CD", "folder": "team", "kind": "database", "enabled": false}],
            "limits": {"max_records": 4, "max_duration_ms": 1500},
            "worker": {"debounce_ms": 250}
        }"#;
        let config = EngineConfig::from_json(json).unwrap();

        assert_eq!(config.default_folder, "notes");
        assert_eq!(config.roots[0].id, EntityId::new("abcd"));
        assert_eq!(config.roots[0].kind, EntityKind::Database);
        assert!(!config.roots[0].enabled);
        assert_eq!(config.limits.max_records, Some(4));
        assert_eq!(config.limits.max_duration, Some(Duration::from_millis(1500)));
        assert_eq!(config.worker.debounce, Duration::from_millis(250));
        assert_eq!(config.push_retry, RetryConfig::default());
    }

    #[test]
    fn disabled_roots() {
        let config = EngineConfig::new()
            .with_root(RootConfig::new("r1", "wiki"))
            .with_root(RootConfig::new("r2", "old").with_enabled(false));
        assert!(!config.is_disabled_root(&EntityId::new("r1")));
        assert!(config.is_disabled_root(&EntityId::new("r2")));
        assert!(!config.is_disabled_root(&EntityId::new("p9")));
    }

    #[test]
    fn config_rejects_bookkeeping_folder() {
        let json = br#"{"default_folder": ".docsync/content"}"#;
        assert!(matches!(
            EngineConfig::from_json(json),
            Err(EngineError::Config { .. })
        ));
        assert!(EngineConfig::from_json(b"{\"checkpoint_every\": 0}").is_err());
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn rate_limit_backoff_doubles() {
        let config = RateLimitConfig::new().with_retries(4, Duration::from_millis(10));
        assert_eq!(config.backoff_for_retry(1), Duration::from_millis(10));
        assert_eq!(config.backoff_for_retry(2), Duration::from_millis(20));
        assert_eq!(config.backoff_for_retry(3), Duration::from_millis(40));
    }
}
