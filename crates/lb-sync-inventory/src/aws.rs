//! ---
//! lbs_section: "02-cloud-inventory"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Cloud inventory client abstractions and the AWS binding."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
use async_trait::async_trait;
use aws_sdk_autoscaling::config::Region;
use indexmap::IndexMap;
use tracing::debug;

use crate::{sort_members, InventoryError, InventorySource, Member};

/// Upper bound on records per describe call; the group sizes this
/// daemon fronts stay well under it.
const MAX_RECORDS: i32 = 100;

/// Inventory source backed by the AWS Auto Scaling and EC2 APIs.
///
/// Membership resolution is a two-step protocol: the Auto Scaling API
/// yields the instance ids currently attached to the group, then the
/// EC2 API supplies the descriptive attributes the template needs
/// (addresses, state, tags).
pub struct AwsInventory {
    autoscaling: aws_sdk_autoscaling::Client,
    ec2: aws_sdk_ec2::Client,
}

impl AwsInventory {
    /// Build clients from the ambient AWS environment, optionally
    /// pinning a region.
    pub async fn from_env(region: Option<String>) -> Self {
        let config = match region {
            Some(region) => {
                aws_config::from_env()
                    .region(Region::new(region))
                    .load()
                    .await
            }
            None => aws_config::load_from_env().await,
        };
        Self {
            autoscaling: aws_sdk_autoscaling::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
        }
    }

    async fn group_instance_ids(&self, group: &str) -> Result<Vec<String>, InventoryError> {
        debug!(group, "describing auto scaling group");
        let response = self
            .autoscaling
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(group)
            .max_records(MAX_RECORDS)
            .send()
            .await
            .map_err(|err| InventoryError::Unavailable(err.to_string()))?;

        let Some(record) = response.auto_scaling_groups().first() else {
            return Err(InventoryError::UnknownGroup(group.to_owned()));
        };

        let ids: Vec<String> = record
            .instances()
            .iter()
            .filter_map(|instance| instance.instance_id().map(str::to_owned))
            .collect();
        debug!(group, instances = ids.len(), "described auto scaling group");
        Ok(ids)
    }

    async fn describe_instances(&self, ids: Vec<String>) -> Result<Vec<Member>, InventoryError> {
        let response = self
            .ec2
            .describe_instances()
            .set_instance_ids(Some(ids))
            .send()
            .await
            .map_err(|err| InventoryError::Unavailable(err.to_string()))?;

        let mut members = Vec::new();
        for reservation in response.reservations() {
            for instance in reservation.instances() {
                let Some(id) = instance.instance_id() else {
                    continue;
                };
                let tags: IndexMap<String, String> = instance
                    .tags()
                    .iter()
                    .filter_map(|tag| match (tag.key(), tag.value()) {
                        (Some(key), Some(value)) => Some((key.to_owned(), value.to_owned())),
                        _ => None,
                    })
                    .collect();
                members.push(Member {
                    id: id.to_owned(),
                    private_ip: instance.private_ip_address().map(str::to_owned),
                    public_ip: instance.public_ip_address().map(str::to_owned),
                    state: instance
                        .state()
                        .and_then(|state| state.name())
                        .map(|name| name.as_str().to_owned()),
                    tags,
                });
            }
        }
        Ok(members)
    }
}

#[async_trait]
impl InventorySource for AwsInventory {
    async fn fetch_members(&self, group: &str) -> Result<Vec<Member>, InventoryError> {
        debug_assert!(!group.is_empty(), "group identifier must be non-empty");
        let ids = self.group_instance_ids(group).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut members = self.describe_instances(ids).await?;
        sort_members(&mut members);
        Ok(members)
    }
}
