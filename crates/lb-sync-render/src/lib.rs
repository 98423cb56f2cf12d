//! ---
//! lbs_section: "03-render-reload"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Configuration rendering and atomic output replacement."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
//! Turns a membership snapshot into the load-balancer configuration file.
//!
//! The template is compiled once at startup; a parse failure there is a
//! startup-fatal condition, never a per-cycle one. Output is written to a
//! temporary file in the destination directory and renamed into place so a
//! failed write never leaves a truncated config behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::NamedTempFile;
use tera::Tera;
use thiserror::Error;
use tracing::debug;

use lb_sync_inventory::Member;

const TEMPLATE_NAME: &str = "load-balancer";

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] tera::Error),
    #[error("failed to write configuration to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-cycle view handed to the template. Exists only for the duration
/// of one render call.
#[derive(Debug, Clone, Serialize)]
pub struct RenderView {
    pub group: String,
    pub ssl_cert: String,
    pub generated_at: DateTime<Utc>,
    pub members: Vec<Member>,
}

impl RenderView {
    pub fn new(group: impl Into<String>, ssl_cert: impl Into<String>, members: Vec<Member>) -> Self {
        Self {
            group: group.into(),
            ssl_cert: ssl_cert.into(),
            generated_at: Utc::now(),
            members,
        }
    }
}

/// Renderer holding the compiled template.
pub struct ConfigRenderer {
    tera: Tera,
}

impl ConfigRenderer {
    /// Compile the template source. Called once at startup; errors here
    /// terminate the process before the loop ever runs.
    pub fn from_template_source(source: &str) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, source)?;
        Ok(Self { tera })
    }

    /// Render the view into configuration text. Fails when the template
    /// references fields absent from the view.
    pub fn render(&self, view: &RenderView) -> Result<String> {
        let context = tera::Context::from_serialize(view)?;
        Ok(self.tera.render(TEMPLATE_NAME, &context)?)
    }

    /// Replace `dest` with `contents` atomically: write a temp file next
    /// to the destination, then rename it over the top.
    pub fn write_atomic(&self, contents: &str, dest: &Path) -> Result<()> {
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|source| RenderError::Write {
            path: dest.to_path_buf(),
            source,
        })?;

        let mut staged = NamedTempFile::new_in(&parent).map_err(|source| RenderError::Write {
            path: dest.to_path_buf(),
            source,
        })?;
        staged
            .write_all(contents.as_bytes())
            .and_then(|_| staged.flush())
            .map_err(|source| RenderError::Write {
                path: dest.to_path_buf(),
                source,
            })?;
        staged.persist(dest).map_err(|err| RenderError::Write {
            path: dest.to_path_buf(),
            source: err.error,
        })?;
        debug!(path = %dest.display(), bytes = contents.len(), "configuration written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TEMPLATE: &str = "# {{ group }} via {{ ssl_cert }}\n\
{% for member in members %}server {{ member.id }} {% if member.private_ip %}{{ member.private_ip }}{% else %}-{% endif %}\n{% endfor %}";

    fn view() -> RenderView {
        let mut first = Member::with_id("i-1");
        first.private_ip = Some("10.0.0.1".to_owned());
        RenderView::new("web-asg", "/etc/ssl/cert.pem", vec![first, Member::with_id("i-2")])
    }

    #[test]
    fn renders_member_lines() {
        let renderer = ConfigRenderer::from_template_source(TEMPLATE).unwrap();
        let output = renderer.render(&view()).unwrap();
        assert!(output.starts_with("# web-asg via /etc/ssl/cert.pem"));
        assert!(output.contains("server i-1 10.0.0.1"));
        assert!(output.contains("server i-2 -"));
    }

    #[test]
    fn unknown_field_is_a_template_error() {
        let renderer =
            ConfigRenderer::from_template_source("{{ no_such_field }}").unwrap();
        let err = renderer.render(&view()).unwrap_err();
        assert!(matches!(err, RenderError::Template(_)));
    }

    #[test]
    fn malformed_template_fails_to_compile() {
        assert!(ConfigRenderer::from_template_source("{% for x in %}").is_err());
    }

    #[test]
    fn write_atomic_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("haproxy.cfg");
        fs::write(&dest, "stale contents").unwrap();

        let renderer = ConfigRenderer::from_template_source(TEMPLATE).unwrap();
        renderer.write_atomic("fresh contents", &dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "fresh contents");
    }

    #[test]
    fn write_atomic_creates_missing_parent() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("nested/out/haproxy.cfg");
        let renderer = ConfigRenderer::from_template_source(TEMPLATE).unwrap();
        renderer.write_atomic("contents", &dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "contents");
    }

    #[test]
    fn write_atomic_reports_unwritable_destination() {
        let dir = tempdir().unwrap();
        // The destination itself is a directory, so the final rename fails.
        let dest = dir.path().join("occupied");
        fs::create_dir(&dest).unwrap();
        let renderer = ConfigRenderer::from_template_source(TEMPLATE).unwrap();
        let err = renderer.write_atomic("contents", &dest).unwrap_err();
        assert!(matches!(err, RenderError::Write { .. }));
    }
}
