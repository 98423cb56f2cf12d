//! ---
//! lbs_section: "03-render-reload"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Reload trigger abstraction and service-manager binding."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
//! Causes the external load balancer to pick up a rewritten config.
//!
//! The trigger is a trait so the engine can be tested against a
//! recorded-invocation double instead of actually poking OS service
//! managers. Retry policy lives with the caller; a trigger fires once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use lb_sync_common::config::{ReloadConfig, ReloadMode};

pub type Result<T> = std::result::Result<T, ReloadError>;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' exited with status {status:?}: {stderr}")]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// Abstract capability: signal the consumer process to reload its
/// configuration.
#[async_trait]
pub trait ReloadTrigger: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Production trigger that shells out to the configured service manager.
pub struct ProcessReload {
    mode: ReloadMode,
    service: String,
}

impl ProcessReload {
    pub fn from_config(config: &ReloadConfig) -> Self {
        Self {
            mode: config.mode,
            service: config.service.clone(),
        }
    }

    fn command_line(&self) -> (&'static str, Vec<String>) {
        match self.mode {
            ReloadMode::Systemd => ("systemctl", vec!["reload".to_owned(), self.service.clone()]),
            ReloadMode::Service => ("service", vec![self.service.clone(), "reload".to_owned()]),
        }
    }
}

#[async_trait]
impl ReloadTrigger for ProcessReload {
    async fn reload(&self) -> Result<()> {
        let (program, args) = self.command_line();
        let rendered = format!("{} {}", program, args.join(" "));
        debug!(command = %rendered, "invoking reload");

        let output = Command::new(program)
            .args(&args)
            .output()
            .await
            .map_err(|source| ReloadError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ReloadError::Failed {
                command: rendered,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}

/// Test double that records invocations and plays back scripted results.
#[derive(Debug, Default)]
pub struct RecordingReload {
    results: Mutex<VecDeque<std::result::Result<(), String>>>,
    invocations: AtomicUsize,
}

impl RecordingReload {
    /// A trigger that always succeeds.
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Play back the given results in order; once exhausted, succeed.
    pub fn with_results(results: Vec<std::result::Result<(), String>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReloadTrigger for RecordingReload {
    async fn reload(&self) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.results.lock().unwrap().pop_front() {
            None | Some(Ok(())) => Ok(()),
            Some(Err(message)) => Err(ReloadError::Failed {
                command: "recorded reload".to_owned(),
                status: Some(1),
                stderr: message,
            }),
        }
    }
}
