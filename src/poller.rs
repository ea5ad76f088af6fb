//! Background queue poller.
//!
//! Fetches the order queue on a fixed interval, publishes each snapshot to
//! watchers, and hands it to the auto-advance scheduler. A failed fetch
//! skips that tick's pass; the loop keeps going. The loop stops on
//! cancellation or when the signed-in operator loses the status-update
//! permission, and the lock table is cleared whenever it stops.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::OrderApi;
use crate::auth::{AuthState, UPDATE_ORDER_STATUS};
use crate::auto_advance::{AutoAdvanceScheduler, PassOutcome};
use crate::error::AutoAdvanceError;
use crate::order::QueueSnapshot;

/// Floor for the poll interval; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type SnapshotReceiver = watch::Receiver<Option<Arc<QueueSnapshot>>>;

struct PollerShared {
    api: Arc<dyn OrderApi>,
    scheduler: Arc<AutoAdvanceScheduler>,
    auth: Arc<AuthState>,
    interval: Duration,
    snapshot_tx: watch::Sender<Option<Arc<QueueSnapshot>>>,
}

impl PollerShared {
    async fn tick(&self) -> Result<PassOutcome, AutoAdvanceError> {
        if !self.auth.can(UPDATE_ORDER_STATUS) {
            self.scheduler.clear_locks();
            return Err(AutoAdvanceError::Unauthorized);
        }
        let payload = self.api.fetch_queue().await.map_err(AutoAdvanceError::Fetch)?;
        let snapshot = QueueSnapshot::from_payload(&payload, Utc::now())
            .map_err(AutoAdvanceError::Fetch)?;
        let snapshot = Arc::new(snapshot);
        self.snapshot_tx.send_replace(Some(snapshot.clone()));
        Ok(self.scheduler.run_pass(&snapshot, Utc::now()).await)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Auto-advance loop started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Auto-advance loop stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            // In-flight transitions run to completion even if a stop
            // arrives meanwhile.
            match self.tick().await {
                Ok(PassOutcome::Skipped) => debug!("Auto-advance tick skipped"),
                Ok(PassOutcome::Completed(_)) => {}
                Err(AutoAdvanceError::Unauthorized) => {
                    info!("Auto-advance loop stopped: operator lacks {UPDATE_ORDER_STATUS}");
                    break;
                }
                Err(e) => warn!(error = %e, "Auto-advance tick skipped"),
            }
        }

        self.scheduler.clear_locks();
    }
}

struct RunningLoop {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct QueuePoller {
    shared: Arc<PollerShared>,
    running: Mutex<Option<RunningLoop>>,
}

impl QueuePoller {
    pub fn new(
        api: Arc<dyn OrderApi>,
        scheduler: Arc<AutoAdvanceScheduler>,
        auth: Arc<AuthState>,
        interval: Duration,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            shared: Arc::new(PollerShared {
                api,
                scheduler,
                auth,
                interval: interval.max(MIN_POLL_INTERVAL),
                snapshot_tx,
            }),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningLoop>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Spawn the poll loop on the current Tokio runtime. The first tick
    /// fires immediately. Returns `false` if a loop is already running or
    /// there is no runtime to spawn on.
    pub fn start(&self) -> bool {
        let mut running = self.running();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "Auto-advance loop not started: no Tokio runtime");
                return false;
            }
        };
        let shutdown = CancellationToken::new();
        let handle = runtime.spawn(self.shared.clone().run(shutdown.clone()));
        *running = Some(RunningLoop { shutdown, handle });
        true
    }

    /// Cancel the loop, wait for any in-flight pass to settle, and clear
    /// every lock.
    pub async fn stop(&self) {
        let running = self.running().take();
        if let Some(running) = running {
            running.shutdown.cancel();
            if let Err(e) = running.handle.await {
                warn!(error = %e, "Auto-advance loop ended abnormally");
            }
        }
        self.shared.scheduler.clear_locks();
    }

    /// Run one poll iteration outside the loop. Refused, with every lock
    /// cleared, unless the operator may update order status.
    pub async fn poll_once(&self) -> Result<PassOutcome, AutoAdvanceError> {
        self.shared.tick().await
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn latest_snapshot(&self) -> Option<Arc<QueueSnapshot>> {
        self.shared.snapshot_tx.borrow().clone()
    }
}
