//! Background reclamation of expired and fully revoked credentials.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::store::TokenBackend;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(600);
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Receives sweep failures. The sweeper keeps running after reporting.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, stage: &'static str, err: &Error);
}

/// Default sink: an `error!` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, stage: &'static str, err: &Error) {
        error!(stage, error = %err, "token gc sweep failed");
    }
}

#[derive(Clone)]
pub struct GcSweeper {
    backend: Arc<dyn TokenBackend>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    sink: Arc<dyn DiagnosticSink>,
}

impl GcSweeper {
    #[must_use]
    pub fn new(backend: Arc<dyn TokenBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            interval: DEFAULT_INTERVAL,
            sink: Arc::new(TracingSink),
        }
    }

    /// Tick period; anything shorter than one second is raised to one second.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Count, then hard-delete, every row that is expired or has no identifier left.
    ///
    /// # Errors
    /// The first backend failure; nothing is retried.
    pub async fn sweep_once(&self) -> Result<u64> {
        self.sweep().await.map_err(|(_, err)| err)
    }

    #[instrument(skip(self))]
    async fn sweep(&self) -> std::result::Result<u64, (&'static str, Error)> {
        let now = self.clock.now();
        let eligible = self
            .backend
            .count_gc_eligible(now)
            .await
            .map_err(|err| ("count", err))?;
        if eligible == 0 {
            return Ok(0);
        }
        let deleted = self
            .backend
            .delete_gc_eligible(now)
            .await
            .map_err(|err| ("delete", err))?;
        debug!(eligible, deleted, "expired credentials reclaimed");
        Ok(deleted)
    }

    async fn tick(&self) {
        if let Err((stage, err)) = self.sweep().await {
            self.sink.report(stage, &err);
        }
    }

    /// Run the sweep loop on the current runtime. The first sweep happens one
    /// interval after spawning. Dropping the returned handle also stops the loop.
    #[must_use]
    pub fn spawn(self) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = timer.tick() => self.tick().await,
                }
            }
            debug!("token gc sweeper stopped");
        });

        info!(interval_seconds = period.as_secs(), "token gc sweeper started");

        SweeperHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Owner of a running sweeper.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the timer and wait for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "token gc sweeper task failed");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
