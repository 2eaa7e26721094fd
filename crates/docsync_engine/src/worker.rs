//! Background worker that runs passes when woken.

use crate::config::WorkerConfig;
use crate::engine::SyncEngine;
use crate::error::EngineResult;
use docsync_core::RemoteSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wakes a [`SyncWorker`].
///
/// Wake-ups never block. While one is already pending, further wake-ups
/// coalesce into it.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<()>,
}

impl Notifier {
    /// Requests a pass. Returns false if the request coalesced into a
    /// pending one or the worker has stopped.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => false,
            Err(mpsc::error::TrySendError::Closed(())) => {
                tracing::debug!("worker stopped; wake-up dropped");
                false
            }
        }
    }
}

/// Runs sync passes on a background task, one at a time.
///
/// After a wake-up the worker waits out the debounce window, absorbs any
/// wake-ups that arrived meanwhile, and runs a single pass on the blocking
/// thread pool. Pass failures are logged and the worker keeps going; it
/// only stops when the cancellation token fires.
#[derive(Debug)]
pub struct SyncWorker {
    notifier: Notifier,
    passes: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Spawns a worker that calls `pass` for every debounced wake-up.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(config: WorkerConfig, cancel: CancellationToken, pass: F) -> Self
    where
        F: Fn(&CancellationToken) -> EngineResult<()> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let passes = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run(config, cancel, Arc::new(pass), rx, Arc::clone(&passes)));
        Self {
            notifier: Notifier { tx },
            passes,
            handle,
        }
    }

    /// Spawns a worker that runs [`SyncEngine::run_pass`].
    pub fn for_engine<R>(engine: Arc<SyncEngine<R>>, cancel: CancellationToken) -> Self
    where
        R: RemoteSource + 'static,
    {
        let config = engine.config().worker.clone();
        Self::spawn(config, cancel, move |token| engine.run_pass(token).map(|_| ()))
    }

    /// Returns a handle that wakes this worker.
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Passes completed so far, failed ones included.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Waits for the worker to stop.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "sync worker panicked");
        }
    }
}

async fn run<F>(
    config: WorkerConfig,
    cancel: CancellationToken,
    pass: Arc<F>,
    mut rx: mpsc::Receiver<()>,
    passes: Arc<AtomicU64>,
) where
    F: Fn(&CancellationToken) -> EngineResult<()> + Send + Sync + 'static,
{
    tracing::info!(debounce_ms = config.debounce.as_millis() as u64, "sync worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            wake = rx.recv() => {
                if wake.is_none() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.debounce) => {}
        }
        while rx.try_recv().is_ok() {}

        let pass = Arc::clone(&pass);
        let token = cancel.clone();
        match tokio::task::spawn_blocking(move || pass(&token)).await {
            Ok(Ok(())) => tracing::debug!("pass completed"),
            Ok(Err(e)) => tracing::error!(error = %e, "pass failed"),
            Err(e) => tracing::error!(error = %e, "pass panicked"),
        }
        passes.fetch_add(1, Ordering::SeqCst);
    }
    tracing::info!("sync worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::time::Duration;

    fn counting_worker(debounce: Duration) -> (SyncWorker, CancellationToken, Arc<AtomicU64>) {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let worker = SyncWorker::spawn(
            WorkerConfig::default().with_debounce(debounce),
            cancel.clone(),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
        (worker, cancel, calls)
    }

    #[tokio::test]
    async fn wakeups_coalesce_into_one_pass() {
        let (worker, cancel, calls) = counting_worker(Duration::from_millis(50));
        let notifier = worker.notifier();

        assert!(notifier.notify());
        for _ in 0..20 {
            notifier.notify();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(worker.passes(), 1);

        cancel.cancel();
        worker.join().await;
    }

    #[tokio::test]
    async fn later_wakeup_runs_another_pass() {
        let (worker, cancel, calls) = counting_worker(Duration::from_millis(10));
        let notifier = worker.notifier();

        notifier.notify();
        tokio::time::sleep(Duration::from_millis(150)).await;
        notifier.notify();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        cancel.cancel();
        worker.join().await;
    }

    #[tokio::test]
    async fn failing_pass_keeps_worker_alive() {
        let cancel = CancellationToken::new();
        let worker = SyncWorker::spawn(
            WorkerConfig::default().with_debounce(Duration::from_millis(5)),
            cancel.clone(),
            |_| Err(EngineError::config("broken")),
        );
        let notifier = worker.notifier();

        notifier.notify();
        tokio::time::sleep(Duration::from_millis(100)).await;
        notifier.notify();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(worker.passes(), 2);
        cancel.cancel();
        worker.join().await;
    }

    #[tokio::test]
    async fn cancellation_stops_idle_worker() {
        let (worker, cancel, calls) = counting_worker(Duration::from_secs(60));
        let notifier = worker.notifier();
        notifier.notify();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker.join())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!notifier.notify());
    }
}
