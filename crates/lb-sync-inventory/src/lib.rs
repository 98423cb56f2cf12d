//! ---
//! lbs_section: "02-cloud-inventory"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Cloud inventory client abstractions and the AWS binding."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
//! Membership inventory for the reconciliation loop.
//!
//! The daemon only ever asks one question of the cloud: "who is in the
//! group right now?". [`InventorySource`] captures that question behind a
//! trait so the engine can be exercised against scripted doubles, and
//! [`aws::AwsInventory`] answers it with the Auto Scaling and EC2 APIs.

pub mod aws;
pub mod fake;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use aws::AwsInventory;
pub use fake::StaticInventory;

/// One compute instance currently belonging to the monitored group.
///
/// Created fresh on every poll and discarded after rendering; only the
/// `id` participates in change detection, the rest exists for the
/// template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub tags: IndexMap<String, String>,
}

impl Member {
    /// Construct a member with just an identifier. Mostly useful in tests.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            private_ip: None,
            public_ip: None,
            state: None,
            tags: IndexMap::new(),
        }
    }
}

/// Failures while reading group membership from the cloud source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Network, authorization, or API failure. Transient; the caller
    /// retries on the next tick.
    #[error("inventory source unavailable: {0}")]
    Unavailable(String),
    /// The describe call returned no record for the named group, which
    /// usually means the group name is misconfigured.
    #[error("auto scaling group '{0}' not found")]
    UnknownGroup(String),
}

/// Abstract capability: given a group identifier, return the current
/// list of member descriptors.
///
/// Implementations must return members in a deterministic order
/// (sorted by id) so identical membership never looks changed because
/// of source ordering. A group that exists but currently has zero
/// members yields `Ok(vec![])`; the engine decides how to treat that.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn fetch_members(&self, group: &str) -> Result<Vec<Member>, InventoryError>;
}

/// Sort members into the canonical order used for comparison and
/// rendering.
pub fn sort_members(members: &mut [Member]) {
    members.sort_by(|a, b| a.id.cmp(&b.id));
}
