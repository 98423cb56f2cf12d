//! ---
//! lbs_section: "01-core-functionality"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Primary reconciliation engine and lifecycle management."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use lb_sync_common::config::AppConfig;
use lb_sync_inventory::{InventoryError, InventorySource};
use lb_sync_metrics::CycleMetrics;
use lb_sync_reload::{ReloadError, ReloadTrigger};
use lb_sync_render::{ConfigRenderer, RenderError, RenderView};

use crate::diff::{membership_equal, Baseline};

/// Failure of a single reconciliation cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to fetch group membership: {0}")]
    Inventory(#[from] InventoryError),
    #[error("group '{group}' returned no members; is the group name correct?")]
    EmptyGroup { group: String },
    #[error("failed to render configuration: {0}")]
    Render(#[from] RenderError),
    #[error("configuration written but reload failed: {0}")]
    Reload(#[from] ReloadError),
}

impl CycleError {
    /// Stable label used in logs and the failure counter.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Inventory(_) => "inventory",
            CycleError::EmptyGroup { .. } => "empty-group",
            CycleError::Render(_) => "render",
            CycleError::Reload(_) => "reload",
        }
    }
}

/// A failed cycle together with the baseline the caller must carry into
/// the next tick.
///
/// Inventory, empty-group, and render failures retain the previous
/// baseline untouched. A reload failure advances it: the file on disk
/// was already rewritten, so a later poll of unchanged membership must
/// not render again.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CycleFailure {
    pub baseline: Baseline,
    #[source]
    pub error: CycleError,
}

/// What a successful cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleAction {
    /// Membership matched the baseline; nothing was written or reloaded.
    Unchanged,
    /// Membership changed; the configuration was rendered and the
    /// consumer reloaded.
    Reconciled { members: usize },
}

/// Outcome of a completed cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub baseline: Baseline,
    pub action: CycleAction,
}

/// Executes one full poll-diff-render-reload cycle.
///
/// The engine holds no state across cycles beyond its collaborators;
/// the baseline is owned by the caller and passed through each
/// `run_cycle`.
pub struct ReconcileEngine {
    config: Arc<AppConfig>,
    inventory: Arc<dyn InventorySource>,
    renderer: ConfigRenderer,
    reload: Arc<dyn ReloadTrigger>,
    metrics: Option<CycleMetrics>,
}

impl ReconcileEngine {
    pub fn new(
        config: Arc<AppConfig>,
        inventory: Arc<dyn InventorySource>,
        renderer: ConfigRenderer,
        reload: Arc<dyn ReloadTrigger>,
        metrics: Option<CycleMetrics>,
    ) -> Self {
        Self {
            config,
            inventory,
            renderer,
            reload,
            metrics,
        }
    }

    /// Run one reconciliation cycle against `previous`.
    ///
    /// Returns the report with the new baseline, or a failure carrying
    /// the baseline to use next tick (see [`CycleFailure`] for the
    /// advancement rules).
    pub async fn run_cycle(&self, previous: &Baseline) -> Result<CycleReport, CycleFailure> {
        let started = Instant::now();
        let result = self.cycle(previous).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_cycle(started.elapsed());
            if let Err(failure) = &result {
                metrics.record_failure(failure.error.kind());
            }
        }
        result
    }

    async fn cycle(&self, previous: &Baseline) -> Result<CycleReport, CycleFailure> {
        let group = self.config.group.as_str();

        let members = match self.inventory.fetch_members(group).await {
            Ok(members) => members,
            Err(err) => {
                return Err(CycleFailure {
                    baseline: previous.clone(),
                    error: err.into(),
                })
            }
        };

        if members.is_empty() {
            return Err(CycleFailure {
                baseline: previous.clone(),
                error: CycleError::EmptyGroup {
                    group: group.to_owned(),
                },
            });
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_group_members(members.len());
        }

        let candidate = Baseline::from_ids(members.iter().map(|m| m.id.clone()).collect());

        if membership_equal(previous.ids(), candidate.ids()) {
            debug!(group, members = candidate.len(), "membership unchanged");
            return Ok(CycleReport {
                baseline: candidate,
                action: CycleAction::Unchanged,
            });
        }

        info!(
            group,
            previous = previous.len(),
            current = candidate.len(),
            "membership changed; rendering configuration"
        );

        let view = RenderView::new(
            group,
            self.config.ssl_cert.display().to_string(),
            members,
        );
        let rendered = match self.renderer.render(&view) {
            Ok(rendered) => rendered,
            Err(err) => {
                return Err(CycleFailure {
                    baseline: previous.clone(),
                    error: err.into(),
                })
            }
        };
        if let Err(err) = self.renderer.write_atomic(&rendered, &self.config.output) {
            return Err(CycleFailure {
                baseline: previous.clone(),
                error: err.into(),
            });
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_render();
        }

        info!(group, service = %self.config.reload.service, "reloading load balancer");
        if let Err(err) = self.reload.reload().await {
            // The written file is already accurate; advancing the baseline
            // keeps the next unchanged poll from rendering again. The stale
            // consumer is surfaced to the operator, not retried here.
            return Err(CycleFailure {
                baseline: candidate,
                error: err.into(),
            });
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_reload();
        }

        let members = candidate.len();
        Ok(CycleReport {
            baseline: candidate,
            action: CycleAction::Reconciled { members },
        })
    }
}
