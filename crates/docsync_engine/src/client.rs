//! Rate-limited, retrying wrapper around a remote source.

use crate::config::RateLimitConfig;
use docsync_core::{
    BlockPage, Entity, EntityId, EntityPage, RemoteError, RemoteResult, RemoteSource,
    SearchControl, User,
};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Longest uninterrupted sleep before the cancellation token is checked again.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Sleeps for `duration` unless `cancel` fires first.
///
/// Returns false if the wait was cancelled.
pub(crate) fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(WAIT_SLICE));
    }
}

/// Token bucket refilled continuously at a fixed rate.
#[derive(Debug)]
struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    fn new(rate: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            rate,
            capacity,
            tokens: capacity,
            refilled_at: Instant::now(),
        }
    }

    /// Takes a token, or returns how long until one is available.
    fn try_take(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.refilled_at = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }
}

/// Wraps a [`RemoteSource`] with request throttling and bounded retries.
///
/// Every call first takes a token from a shared bucket. Rate-limited and
/// transient failures are retried with doubling backoff, honoring a
/// server-suggested wait when it is longer. Waits end early when the
/// cancellation token fires, and the call then fails with
/// [`RemoteError::Cancelled`].
pub struct ThrottledSource<R> {
    inner: R,
    config: RateLimitConfig,
    bucket: Mutex<TokenBucket>,
    cancel: CancellationToken,
}

impl<R: RemoteSource> ThrottledSource<R> {
    /// Wraps `inner`.
    pub fn new(inner: R, config: RateLimitConfig, cancel: CancellationToken) -> Self {
        let bucket = TokenBucket::new(config.requests_per_second, config.burst);
        Self {
            inner,
            config,
            bucket: Mutex::new(bucket),
            cancel,
        }
    }

    /// Returns the rate limit in effect.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Returns the wrapped source.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn acquire(&self) -> RemoteResult<()> {
        loop {
            let wait = match self.bucket.lock().try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            if !cancellable_sleep(wait, &self.cancel) {
                return Err(RemoteError::Cancelled);
            }
        }
    }

    fn call<T>(&self, op: &str, mut request: impl FnMut(&R) -> RemoteResult<T>) -> RemoteResult<T> {
        let mut retry = 0;
        loop {
            self.acquire()?;
            let error = match request(&self.inner) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() || retry >= self.config.max_retries {
                return Err(error);
            }
            retry += 1;

            let mut backoff = self.config.backoff_for_retry(retry);
            if let RemoteError::RateLimited {
                retry_after: Some(after),
            } = &error
            {
                backoff = backoff.max(*after);
            }
            tracing::warn!(op, retry, backoff_ms = backoff.as_millis() as u64, error = %error, "retrying remote call");

            if !cancellable_sleep(backoff, &self.cancel) {
                return Err(RemoteError::Cancelled);
            }
        }
    }
}

impl<R: RemoteSource> RemoteSource for ThrottledSource<R> {
    fn fetch_entity(&self, id: &EntityId) -> RemoteResult<Entity> {
        self.call("fetch_entity", |r| r.fetch_entity(id))
    }

    fn fetch_block_children(&self, id: &EntityId, cursor: Option<&str>) -> RemoteResult<BlockPage> {
        self.call("fetch_block_children", |r| r.fetch_block_children(id, cursor))
    }

    fn query_database(&self, id: &EntityId, cursor: Option<&str>) -> RemoteResult<EntityPage> {
        self.call("query_database", |r| r.query_database(id, cursor))
    }

    fn search(
        &self,
        query: &str,
        visit: &mut dyn FnMut(Entity) -> SearchControl,
    ) -> RemoteResult<()> {
        // A retry restarts the scan, so results already visited are seen
        // again; callers dedupe by id.
        self.call("search", |r| r.search(query, &mut *visit))
    }

    fn fetch_user(&self, id: &EntityId) -> RemoteResult<User> {
        self.call("fetch_user", |r| r.fetch_user(id))
    }

    fn download(&self, url: &str) -> RemoteResult<Vec<u8>> {
        self.call("download", |r| r.download(url))
    }
}

impl<R> std::fmt::Debug for ThrottledSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledSource")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` user lookups with `error`.
    struct Flaky {
        failures: u32,
        error: RemoteError,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: RemoteError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl RemoteSource for Flaky {
        fn fetch_entity(&self, id: &EntityId) -> RemoteResult<Entity> {
            Err(RemoteError::not_found(id.as_str()))
        }
        fn fetch_block_children(&self, _: &EntityId, _: Option<&str>) -> RemoteResult<BlockPage> {
            Ok(BlockPage::default())
        }
        fn query_database(&self, _: &EntityId, _: Option<&str>) -> RemoteResult<EntityPage> {
            Ok(EntityPage::default())
        }
        fn search(&self, _: &str, _: &mut dyn FnMut(Entity) -> SearchControl) -> RemoteResult<()> {
            Ok(())
        }
        fn fetch_user(&self, id: &EntityId) -> RemoteResult<User> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            Ok(User {
                id: id.clone(),
                name: "Ada".into(),
                kind: docsync_core::UserKind::Person,
                email: None,
            })
        }
        fn download(&self, _: &str) -> RemoteResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn fast_config(max_retries: u32) -> RateLimitConfig {
        RateLimitConfig::new()
            .with_rate(1000.0, 10)
            .with_retries(max_retries, Duration::from_millis(1))
    }

    #[test]
    fn retries_rate_limited_calls() {
        let source = ThrottledSource::new(
            Flaky::new(2, RemoteError::RateLimited { retry_after: None }),
            fast_config(3),
            CancellationToken::new(),
        );

        let user = source.fetch_user(&EntityId::new("u1")).unwrap();
        assert_eq!(user.name, "Ada");
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_bounded_retries() {
        let source = ThrottledSource::new(
            Flaky::new(10, RemoteError::server(502, "bad gateway")),
            fast_config(2),
            CancellationToken::new(),
        );

        let err = source.fetch_user(&EntityId::new("u1")).unwrap_err();
        assert_eq!(err, RemoteError::server(502, "bad gateway"));
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let source = ThrottledSource::new(
            Flaky::new(10, RemoteError::Forbidden { message: "no".into() }),
            fast_config(5),
            CancellationToken::new(),
        );

        assert!(source.fetch_user(&EntityId::new("u1")).is_err());
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let config = RateLimitConfig::new()
            .with_rate(1000.0, 10)
            .with_retries(5, Duration::from_secs(30));
        let source = ThrottledSource::new(
            Flaky::new(10, RemoteError::RateLimited { retry_after: None }),
            config,
            cancel.clone(),
        );

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        });
        let started = Instant::now();
        let err = source.fetch_user(&EntityId::new("u1")).unwrap_err();
        canceller.join().unwrap();

        assert_eq!(err, RemoteError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn token_bucket_limits_burst() {
        let mut bucket = TokenBucket::new(1.0, 2);
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_ok());
        let wait = bucket.try_take().unwrap_err();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(1));
    }
}
