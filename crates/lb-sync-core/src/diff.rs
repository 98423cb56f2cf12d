//! ---
//! lbs_section: "01-core-functionality"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Primary reconciliation engine and lifecycle management."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
//! Membership comparison. Pure functions only; nothing here touches the
//! outside world.

/// The membership snapshot the most recently completed cycle operated
/// on. Ids are held in normalised (sorted) order, replaced wholesale
/// each cycle and never partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Baseline(Vec<String>);

impl Baseline {
    /// The state before the first poll: no known members.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a baseline from raw ids, normalising their order.
    pub fn from_ids(ids: Vec<String>) -> Self {
        Self(normalize(ids))
    }

    pub fn ids(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Sort ids into the canonical order used for comparison.
///
/// The inventory source's ordering carries no meaning, so comparisons
/// must not depend on it; without this step identical membership could
/// be reported as changed.
pub fn normalize(mut ids: Vec<String>) -> Vec<String> {
    ids.sort_unstable();
    ids
}

/// Equal iff same length and pairwise-equal elements under normalised
/// ordering. Two empty sequences are equal.
pub fn membership_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).all(|(left, right)| left == right)
}
