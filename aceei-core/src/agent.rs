use serde::{Deserialize, Serialize};

use crate::types::{AgentId, Bundle, ItemId, Utility};

/// An agent with additive utilities and pairwise item exclusions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub utilities: Vec<Utility>,
    #[serde(default)]
    pub conflicts: Vec<(ItemId, ItemId)>,
}

impl Agent {
    pub fn new(id: AgentId, utilities: Vec<Utility>) -> Self {
        Self {
            id,
            utilities,
            conflicts: Vec::new(),
        }
    }

    pub fn with_conflict(mut self, a: ItemId, b: ItemId) -> Self {
        self.conflicts.push((a, b));
        self
    }

    pub fn with_conflicts(mut self, conflicts: impl IntoIterator<Item = (ItemId, ItemId)>) -> Self {
        self.conflicts.extend(conflicts);
        self
    }

    pub fn n_items(&self) -> usize {
        self.utilities.len()
    }

    /// Additive utility of a bundle.
    pub fn utility(&self, bundle: &Bundle) -> Utility {
        bundle
            .taken()
            .map(|j| self.utilities.get(j).copied().unwrap_or(0.0))
            .sum()
    }

    /// A bundle is valid when no conflict pair is fully taken.
    pub fn is_valid(&self, bundle: &Bundle) -> bool {
        self.conflicts
            .iter()
            .all(|&(a, b)| !(bundle.contains(a) && bundle.contains(b)))
    }
}
