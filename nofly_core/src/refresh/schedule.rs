use crate::error::error_chain;
use crate::refresh::error::RefreshError;
use crate::refresh::traits::ZoneRefresh;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodic driver for refresh cycles.
///
/// - A ticker task fires immediately and then every `interval`.
/// - Each tick hands a run request to a single worker task.
/// - A tick that lands while a cycle is in flight is skipped, never queued.
/// - Cycle failures and panics are logged and the schedule keeps going.
pub struct RefreshScheduler;

impl RefreshScheduler {
    #[tracing::instrument(level = "info", skip(refresh))]
    pub fn start(refresh: Arc<dyn ZoneRefresh>, interval: Duration) -> SchedulerHandle {
        let shared = Arc::new(Shared::default());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<()>(1);

        let worker = tokio::spawn(run_worker(refresh, rx, shared.clone(), cancel.clone()));
        let ticker = tokio::spawn(run_ticker(
            interval,
            tx.clone(),
            shared.clone(),
            cancel.clone(),
        ));

        SchedulerHandle {
            shared,
            cancel,
            tx,
            ticker,
            worker,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    busy: AtomicBool,
    completed: AtomicU64,
    skipped: AtomicU64,
}

impl Shared {
    /// Claim the busy flag and queue a cycle. Returns false when one is already in flight.
    fn request(&self, tx: &mpsc::Sender<()>, origin: &'static str) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::info!(origin, "refresh cycle still running; skipping");
            return false;
        }
        if tx.try_send(()).is_err() {
            self.busy.store(false, Ordering::Release);
            return false;
        }
        true
    }
}

pub struct SchedulerHandle {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tx: mpsc::Sender<()>,
    ticker: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling new cycles. An in-flight cycle runs to completion.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the ticker and worker to exit.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.ticker.await {
            tracing::warn!(error = %e, "refresh ticker task ended abnormally");
        }
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "refresh worker task ended abnormally");
        }
    }

    /// Request an immediate cycle. Returns false if one is already running.
    pub fn trigger(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.shared.request(&self.tx, "trigger")
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Cycles finished so far, successful or not.
    pub fn completed_cycles(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }
}

async fn run_ticker(
    interval: Duration,
    tx: mpsc::Sender<()>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                shared.request(&tx, "tick");
            }
        }
    }
    tracing::debug!("refresh ticker stopped");
}

async fn run_worker(
    refresh: Arc<dyn ZoneRefresh>,
    mut rx: mpsc::Receiver<()>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => {
                if msg.is_none() {
                    break;
                }
                run_cycle(refresh.clone()).await;
                shared.completed.fetch_add(1, Ordering::Relaxed);
                shared.busy.store(false, Ordering::Release);
            }
        }
    }
    tracing::debug!("refresh worker stopped");
}

/// One cycle on its own task so a panic is contained to the cycle.
async fn run_cycle(refresh: Arc<dyn ZoneRefresh>) {
    let started = Instant::now();
    let outcome = tokio::spawn(async move { refresh.refresh().await }).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(Ok(report)) => tracing::info!(
            written = report.written,
            dropped = report.dropped,
            layers = report.layers.len(),
            elapsed_ms,
            "scheduled refresh completed"
        ),
        // An on-demand cycle holds the engine; same outcome as a busy tick.
        Ok(Err(RefreshError::AlreadyRunning)) => tracing::info!(
            origin = "tick",
            elapsed_ms,
            "refresh cycle still running; skipping"
        ),
        Ok(Err(e)) => tracing::error!(
            error = %error_chain(&e),
            elapsed_ms,
            "scheduled refresh failed"
        ),
        Err(e) => tracing::error!(
            error = %error_chain(&e),
            elapsed_ms,
            "scheduled refresh panicked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::refresh::error::PersistStage;
    use crate::refresh::models::RefreshReport;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::io::Write;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct StubRefresh {
        calls: AtomicUsize,
        duration: Duration,
        fail_first: bool,
        busy_first: bool,
        panic_first: bool,
    }

    #[async_trait]
    impl ZoneRefresh for StubRefresh {
        async fn refresh(&self) -> Result<RefreshReport, RefreshError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.duration.is_zero() {
                tokio::time::sleep(self.duration).await;
            }
            if n == 0 && self.panic_first {
                panic!("first cycle blew up");
            }
            if n == 0 && self.fail_first {
                return Err(RefreshError::Persistence {
                    stage: PersistStage::Insert,
                    source: Error::backend(
                        "postgres: insert zones",
                        std::io::Error::other("relation \"no_fly_zones\" does not exist"),
                    ),
                });
            }
            if n == 0 && self.busy_first {
                return Err(RefreshError::AlreadyRunning);
            }
            let now = Utc::now();
            Ok(RefreshReport {
                started_at: now,
                finished_at: now,
                written: 0,
                dropped: 0,
                layers: Vec::new(),
            })
        }
    }

    fn calls(stub: &StubRefresh) -> usize {
        stub.calls.load(Ordering::SeqCst)
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    /// Run one scheduled cycle with logs captured on this thread.
    async fn first_cycle_logs(stub: StubRefresh) -> String {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let handle = RefreshScheduler::start(Arc::new(stub), MINUTE);
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.shutdown().await;
        logs.text()
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_does_not_stop_the_next() {
        let stub = Arc::new(StubRefresh {
            fail_first: true,
            ..Default::default()
        });
        let handle = RefreshScheduler::start(stub.clone(), MINUTE);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls(&stub), 1);
        tokio::time::sleep(MINUTE).await;
        assert_eq!(calls(&stub), 2);
        assert_eq!(handle.completed_cycles(), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_log_carries_root_cause() {
        let logs = first_cycle_logs(StubRefresh {
            fail_first: true,
            ..Default::default()
        })
        .await;

        let line = logs
            .lines()
            .find(|l| l.contains("scheduled refresh failed"))
            .unwrap();
        assert!(line.contains("ERROR"), "{line}");
        assert!(line.contains("persistence failed during insert"), "{line}");
        assert!(line.contains("postgres: insert zones"), "{line}");
        assert!(line.contains("does not exist"), "{line}");
    }

    #[tokio::test(start_paused = true)]
    async fn engine_busy_is_logged_as_skip() {
        let logs = first_cycle_logs(StubRefresh {
            busy_first: true,
            ..Default::default()
        })
        .await;

        assert!(!logs.contains("ERROR"), "{logs}");
        let line = logs.lines().find(|l| l.contains("skipping")).unwrap();
        assert!(line.contains("INFO"), "{line}");
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_cycle_does_not_stop_the_next() {
        let stub = Arc::new(StubRefresh {
            panic_first: true,
            ..Default::default()
        });
        let handle = RefreshScheduler::start(stub.clone(), MINUTE);

        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
        assert_eq!(calls(&stub), 2);
        assert!(!handle.is_busy());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_tick_is_skipped() {
        let stub = Arc::new(StubRefresh {
            duration: Duration::from_secs(90),
            ..Default::default()
        });
        let handle = RefreshScheduler::start(stub.clone(), MINUTE);

        // Cycle 1 runs 0s..90s, so the 60s tick is dropped.
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(calls(&stub), 1);
        assert_eq!(handle.skipped_ticks(), 1);

        // The 120s tick starts cycle 2.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls(&stub), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_while_busy_is_rejected() {
        let stub = Arc::new(StubRefresh {
            duration: Duration::from_secs(10),
            ..Default::default()
        });
        let handle = RefreshScheduler::start(stub.clone(), MINUTE);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.is_busy());
        assert!(!handle.trigger());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handle.trigger());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls(&stub), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_further_cycles() {
        let stub = Arc::new(StubRefresh::default());
        let handle = RefreshScheduler::start(stub.clone(), MINUTE);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls(&stub), 1);
        handle.stop();
        assert!(!handle.trigger());

        tokio::time::sleep(MINUTE * 5).await;
        assert_eq!(calls(&stub), 1);
        handle.shutdown().await;
    }
}
