//! Drain coordination.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use harbor_core::{ActionQueue, CacheLayer, DrainReport, QueuedAction, ReplayOutcome};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityObserver;
use crate::error::SyncResult;
use crate::replay::ActionReplayer;

/// The current state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No drain is running.
    Idle,
    /// A drain pass is replaying actions.
    Draining,
}

/// What caused a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    /// Connectivity went from offline to online.
    Reconnected,
    /// The periodic timer fired.
    Periodic,
    /// The host asked for a sync.
    Manual,
}

impl fmt::Display for DrainTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DrainTrigger::Reconnected => "reconnected",
            DrainTrigger::Periodic => "periodic",
            DrainTrigger::Manual => "manual",
        })
    }
}

/// Result of a drain request.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// A pass ran.
    Completed(DrainReport),
    /// Another pass was running; nothing was done.
    AlreadyDraining,
    /// The remote is unreachable; nothing was done.
    Offline,
}

impl DrainOutcome {
    /// The report, if a pass ran.
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Statistics about drain passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that ran.
    pub passes: u64,
    /// Actions synced.
    pub synced: u64,
    /// Actions rescheduled after a retryable failure.
    pub rescheduled: u64,
    /// Actions moved to the failed pool.
    pub failed: u64,
    /// Eligible actions left untouched by aborted passes.
    pub skipped: u64,
    /// Requests rejected because a pass was running.
    pub rejected: u64,
    /// Clock time of the last completed pass in epoch milliseconds.
    pub last_drain_at: Option<u64>,
    /// Trigger of the last completed pass.
    pub last_trigger: Option<DrainTrigger>,
    /// Last error or abort reason.
    pub last_error: Option<String>,
}

/// Exclusive hold on a coordinator's queue and cache.
///
/// Clears the draining flag when dropped, including on panic.
#[must_use = "the hold is released as soon as the guard is dropped"]
pub struct DrainGuard<'a>(&'a AtomicBool);

impl std::fmt::Debug for DrainGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainGuard").finish_non_exhaustive()
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs drain passes over the action queue, at most one at a time.
///
/// Every trigger funnels into [`drain`](Self::drain). A request that arrives
/// while a pass is running returns [`DrainOutcome::AlreadyDraining`] at once.
/// Connectivity is checked before each replay, and losing it stops the pass
/// without penalizing the remaining actions.
pub struct SyncCoordinator {
    queue: Arc<ActionQueue>,
    cache: Arc<CacheLayer>,
    replayer: Arc<dyn ActionReplayer>,
    connectivity: Arc<dyn ConnectivityObserver>,
    config: SyncConfig,
    draining: AtomicBool,
    stats: RwLock<SyncStats>,
}

impl SyncCoordinator {
    /// Creates a coordinator.
    pub fn new(
        queue: Arc<ActionQueue>,
        cache: Arc<CacheLayer>,
        replayer: Arc<dyn ActionReplayer>,
        connectivity: Arc<dyn ConnectivityObserver>,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            replayer,
            connectivity,
            config,
            draining: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        if self.draining.load(Ordering::Acquire) {
            SyncState::Draining
        } else {
            SyncState::Idle
        }
    }

    /// Returns true while a pass is running.
    pub fn is_draining(&self) -> bool {
        self.state() == SyncState::Draining
    }

    /// Takes the draining flag without running a pass.
    ///
    /// Returns `None` if a pass or another holder already has it. While the
    /// guard lives every drain request is rejected with
    /// [`DrainOutcome::AlreadyDraining`].
    pub fn try_lock_drain(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard(&self.draining))
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs one drain pass of up to `batch_size` eligible actions.
    ///
    /// # Errors
    ///
    /// Returns an error if an outcome cannot be persisted. Outcomes recorded
    /// before the error are kept.
    pub fn drain(&self, trigger: DrainTrigger) -> SyncResult<DrainOutcome> {
        if !self.connectivity.is_reachable() {
            debug!(%trigger, "drain skipped, offline");
            return Ok(DrainOutcome::Offline);
        }

        let Some(_guard) = self.try_lock_drain() else {
            debug!(%trigger, "drain already running");
            self.stats.write().rejected += 1;
            return Ok(DrainOutcome::AlreadyDraining);
        };

        debug!(%trigger, pending = self.queue.len(), "drain started");
        let result = self
            .queue
            .drain(self.config.batch_size, |action| self.replay_one(action));

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                warn!(%trigger, error = %e, "drain failed");
                self.stats.write().last_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        self.invalidate_synced(&report.synced);
        self.record(trigger, &report);

        if report.attempted() > 0 || report.aborted.is_some() {
            info!(
                %trigger,
                synced = report.synced.len(),
                rescheduled = report.rescheduled.len(),
                failed = report.failed.len(),
                skipped = report.skipped,
                aborted = report.aborted.as_deref().unwrap_or(""),
                "drain finished"
            );
        }
        Ok(DrainOutcome::Completed(report))
    }

    fn replay_one(&self, action: &QueuedAction) -> ReplayOutcome {
        if !self.connectivity.is_reachable() {
            return ReplayOutcome::unreachable("connectivity lost");
        }
        self.replayer.replay(action)
    }

    fn invalidate_synced(&self, synced: &[QueuedAction]) {
        for key in synced.iter().flat_map(|action| &action.invalidates) {
            if let Err(e) = self.cache.invalidate(key) {
                warn!(logical_key = %key, error = %e, "cache invalidation failed");
            }
        }
    }

    fn record(&self, trigger: DrainTrigger, report: &DrainReport) {
        let mut stats = self.stats.write();
        stats.passes += 1;
        stats.synced += report.synced.len() as u64;
        stats.rescheduled += report.rescheduled.len() as u64;
        stats.failed += report.failed.len() as u64;
        stats.skipped += report.skipped as u64;
        stats.last_drain_at = Some(self.queue.now_ms());
        stats.last_trigger = Some(trigger);
        if let Some(reason) = &report.aborted {
            stats.last_error = Some(reason.clone());
        } else if let Some(failed) = report.failed.last() {
            stats.last_error = Some(failed.reason.to_string());
        }
    }
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
