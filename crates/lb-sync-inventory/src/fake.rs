//! ---
//! lbs_section: "02-cloud-inventory"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Cloud inventory client abstractions and the AWS binding."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{InventoryError, InventorySource, Member};

/// Scripted inventory double.
///
/// Responses are played back in order; the final response repeats once
/// the script is exhausted, so a polling loop can keep observing a
/// stable membership.
#[derive(Debug, Default)]
pub struct StaticInventory {
    responses: Mutex<VecDeque<Result<Vec<Member>, InventoryError>>>,
    fetches: Mutex<usize>,
}

impl StaticInventory {
    pub fn with_responses(responses: Vec<Result<Vec<Member>, InventoryError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fetches: Mutex::new(0),
        }
    }

    /// A source that always returns the same membership.
    pub fn steady(members: Vec<Member>) -> Self {
        Self::with_responses(vec![Ok(members)])
    }

    /// Number of fetches observed so far.
    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn fetch_members(&self, _group: &str) -> Result<Vec<Member>, InventoryError> {
        *self.fetches.lock().unwrap() += 1;
        let mut responses = self.responses.lock().unwrap();
        match responses.len() {
            0 => Err(InventoryError::Unavailable(
                "scripted inventory exhausted".to_owned(),
            )),
            1 => responses.front().cloned().unwrap(),
            _ => responses.pop_front().unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responses_play_in_order_and_last_repeats() {
        let source = StaticInventory::with_responses(vec![
            Ok(vec![Member::with_id("i-1")]),
            Err(InventoryError::Unavailable("boom".into())),
            Ok(vec![]),
        ]);
        assert_eq!(
            source.fetch_members("g").await.unwrap()[0].id,
            "i-1".to_owned()
        );
        assert!(source.fetch_members("g").await.is_err());
        assert!(source.fetch_members("g").await.unwrap().is_empty());
        // Script exhausted down to the final entry, which now repeats.
        assert!(source.fetch_members("g").await.unwrap().is_empty());
        assert_eq!(source.fetches(), 4);
    }
}
