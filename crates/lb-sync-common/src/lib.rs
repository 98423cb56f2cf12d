//! ---
//! lbs_section: "01-core-functionality"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Shared primitives and utilities for the lb-sync runtime."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
//! Core shared primitives for the lb-sync workspace.
//! This crate exposes configuration loading and logging setup consumed
//! across the workspace.

pub mod config;
pub mod logging;

pub use config::{AppConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, ReloadConfig, ReloadMode};
pub use logging::{init_tracing, LogFormat};
