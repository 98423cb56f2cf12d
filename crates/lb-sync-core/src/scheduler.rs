//! ---
//! lbs_section: "01-core-functionality"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Primary reconciliation engine and lifecycle management."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::diff::Baseline;
use crate::engine::{CycleAction, CycleError, ReconcileEngine};

/// Drives the engine on a fixed interval until told to stop.
///
/// Cycles execute in strict succession and never overlap; the baseline
/// observed by cycle N+1 is exactly the one returned by cycle N. The
/// wait between cycles races the interval tick against the shutdown
/// channel, and shutdown wins ties: once signalled, no further cycle is
/// started.
pub struct Scheduler {
    engine: ReconcileEngine,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(engine: ReconcileEngine, poll_interval: Duration) -> Self {
        Self {
            engine,
            poll_interval,
        }
    }

    /// Run the loop, returning the final baseline on shutdown.
    ///
    /// The first tick fires a full `poll_interval` after entry, on the
    /// assumption that the caller already ran the initial cycle that
    /// produced `initial`.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>, initial: Baseline) -> Baseline {
        let mut baseline = initial;
        let mut ticker =
            time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        // A slow cycle delays subsequent ticks instead of bursting.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(poll_interval_secs = self.poll_interval.as_secs(), "reconciliation loop started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("shutdown signal received; stopping reconciliation loop");
                    break;
                }
                _ = ticker.tick() => {
                    baseline = self.run_once(baseline).await;
                }
            }
        }
        baseline
    }

    /// One tick: run a cycle and carry its baseline forward, logging any
    /// failure at the loop boundary. Per-cycle errors never escape; the
    /// poll interval itself is the retry mechanism.
    async fn run_once(&self, baseline: Baseline) -> Baseline {
        match self.engine.run_cycle(&baseline).await {
            Ok(report) => {
                if let CycleAction::Reconciled { members } = report.action {
                    info!(members, "configuration reconciled");
                }
                report.baseline
            }
            Err(failure) => {
                match &failure.error {
                    CycleError::EmptyGroup { .. } | CycleError::Reload(_) => {
                        error!(error = %failure.error, kind = failure.error.kind(), "reconciliation cycle failed");
                    }
                    _ => {
                        warn!(error = %failure.error, kind = failure.error.kind(), "reconciliation cycle failed");
                    }
                }
                failure.baseline
            }
        }
    }
}
