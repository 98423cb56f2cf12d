//! ---
//! lbs_section: "01-core-functionality"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Primary reconciliation engine and lifecycle management."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
//! The reconciliation core: one `run_cycle` turns the observed group
//! membership into an up-to-date load-balancer configuration, and the
//! scheduler repeats that on a fixed interval until shutdown.

pub mod diff;
pub mod engine;
pub mod scheduler;

pub use diff::{membership_equal, normalize, Baseline};
pub use engine::{CycleAction, CycleError, CycleFailure, CycleReport, ReconcileEngine};
pub use scheduler::Scheduler;
