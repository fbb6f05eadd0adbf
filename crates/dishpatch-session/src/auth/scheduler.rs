//! Background access-token refresh.
//!
//! The scheduler keeps an active session from lapsing. It never ends a
//! session itself: a lapsed or unrefreshable token is left for the guard or
//! interceptor to escalate.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::expiry::ExpiryEvaluator;
use super::refresh::RefreshOrchestrator;
use crate::session::SessionState;

/// How often the access token is inspected (30 minutes).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Refresh once less than this much time remains (1 hour).
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Shortest interval the task accepts; `tokio::time::interval` rejects zero.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// What a single scheduler tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NoSession,
    /// Remaining time is at or above the threshold
    Fresh,
    /// Token already past `exp`; left for guards to handle
    Lapsed,
    Refreshed,
    /// Retried on the next tick
    RefreshFailed,
}

#[derive(Clone)]
pub struct AutoRefreshScheduler {
    state: SessionState,
    expiry: ExpiryEvaluator,
    refresher: RefreshOrchestrator,
    interval: Duration,
    threshold: Duration,
}

impl AutoRefreshScheduler {
    pub fn new(
        state: SessionState,
        expiry: ExpiryEvaluator,
        refresher: RefreshOrchestrator,
        interval: Duration,
        threshold: Duration,
    ) -> Self {
        if interval < MIN_REFRESH_INTERVAL {
            warn!(?interval, "Refresh interval too short, using {:?}", MIN_REFRESH_INTERVAL);
        }
        Self {
            state,
            expiry,
            refresher,
            interval: interval.max(MIN_REFRESH_INTERVAL),
            threshold,
        }
    }

    /// Inspect the access token once and refresh it if it is close to expiry.
    pub async fn tick(&self) -> TickOutcome {
        let Some(access) = self.state.access_token() else {
            return TickOutcome::NoSession;
        };

        let remaining = self.expiry.time_remaining(&access).to_std().unwrap_or_default();
        if remaining.is_zero() {
            debug!("Access token already lapsed, skipping proactive refresh");
            return TickOutcome::Lapsed;
        }
        if remaining >= self.threshold {
            debug!(remaining_secs = remaining.as_secs(), "Access token fresh");
            return TickOutcome::Fresh;
        }

        info!(remaining_secs = remaining.as_secs(), "Access token nearing expiry, refreshing");
        match self.refresher.refresh_access_token().await {
            Ok(_) => TickOutcome::Refreshed,
            Err(e) => {
                warn!(error = %e, "Proactive refresh failed, retrying next tick");
                TickOutcome::RefreshFailed
            }
        }
    }

    /// Spawn the recurring task. The first tick runs immediately.
    ///
    /// Dropping the returned handle stops the task.
    pub fn start(self) -> RefreshTaskHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Auto-refresh started");

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    outcome = self.tick() => debug!(?outcome, "Auto-refresh tick"),
                }
            }
            info!("Auto-refresh stopped");
        });

        RefreshTaskHandle { stop_tx, task }
    }
}

/// Owner of a running auto-refresh task.
pub struct RefreshTaskHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshTaskHandle {
    /// Stop the task. No tick starts after this returns.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshTaskHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
