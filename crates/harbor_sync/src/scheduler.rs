//! Background drain scheduling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityObserver;
use crate::coordinator::{DrainOutcome, DrainTrigger, SyncCoordinator};
use crate::error::{SyncError, SyncResult};

type ManualRequest = oneshot::Sender<SyncResult<DrainOutcome>>;

/// Spawns the task that turns connectivity changes, timer ticks and manual
/// requests into drain passes.
///
/// Drains run on the blocking pool; the task waits for one to finish before
/// handling the next event, so events that arrive during a pass are
/// coalesced rather than queued behind it.
#[derive(Debug)]
pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawns the scheduler on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn spawn(
        coordinator: Arc<SyncCoordinator>,
        connectivity: Arc<dyn ConnectivityObserver>,
        config: &SyncConfig,
    ) -> SyncResult<SchedulerHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;

        let (manual_tx, manual_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Read the starting state here so a change made before the task
        // first polls still counts as a transition.
        let mut online = connectivity.subscribe();
        let was_online = *online.borrow_and_update();
        let task = runtime.spawn(run(
            coordinator,
            online,
            was_online,
            config.sync_interval,
            config.drain_on_reconnect,
            manual_rx,
            shutdown_rx,
        ));

        info!(
            interval_ms = config
                .sync_interval
                .map(|i| u64::try_from(i.as_millis()).unwrap_or(u64::MAX)),
            drain_on_reconnect = config.drain_on_reconnect,
            "sync scheduler started"
        );
        Ok(SchedulerHandle {
            manual: manual_tx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    manual: mpsc::Sender<ManualRequest>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests a manual drain and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SchedulerStopped`] if the task has exited, or the
    /// drain's own error.
    pub async fn sync_now(&self) -> SyncResult<DrainOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.manual
            .send(reply_tx)
            .await
            .map_err(|_| SyncError::SchedulerStopped)?;
        reply_rx.await.map_err(|_| SyncError::SchedulerStopped)?
    }

    /// Returns true if the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the scheduler, waiting for an in-flight drain to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "sync scheduler task ended abnormally");
        }
        info!("sync scheduler stopped");
    }
}

async fn run(
    coordinator: Arc<SyncCoordinator>,
    mut online: watch::Receiver<bool>,
    mut was_online: bool,
    period: Option<Duration>,
    drain_on_reconnect: bool,
    mut manual: mpsc::Receiver<ManualRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = period.map(|period| {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut watching = true;

    loop {
        let trigger = tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            changed = online.changed(), if watching => {
                if changed.is_err() {
                    debug!("connectivity source dropped");
                    watching = false;
                    continue;
                }
                let now_online = *online.borrow_and_update();
                let reconnected = now_online && !was_online;
                was_online = now_online;
                debug!(online = now_online, "connectivity changed");
                (reconnected && drain_on_reconnect).then_some(DrainTrigger::Reconnected)
            }

            request = manual.recv() => match request {
                Some(reply) => {
                    let outcome = drain_blocking(&coordinator, DrainTrigger::Manual).await;
                    let _ = reply.send(outcome);
                    continue;
                }
                None => break,
            },

            _ = tick(&mut ticker) => {
                (*online.borrow()).then_some(DrainTrigger::Periodic)
            }
        };

        if let Some(trigger) = trigger {
            if let Err(e) = drain_blocking(&coordinator, trigger).await {
                warn!(%trigger, error = %e, "scheduled drain failed");
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn drain_blocking(
    coordinator: &Arc<SyncCoordinator>,
    trigger: DrainTrigger,
) -> SyncResult<DrainOutcome> {
    let coordinator = Arc::clone(coordinator);
    tokio::task::spawn_blocking(move || coordinator.drain(trigger))
        .await
        .map_err(|e| SyncError::TaskFailed(e.to_string()))?
}
