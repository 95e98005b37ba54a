// Core ID types, type aliases and the bundle vector

use std::fmt;

use serde::{Deserialize, Serialize};

// === TYPE ALIASES ===

pub type ItemId = usize;
pub type Price = f64;
pub type Budget = f64;
pub type Utility = f64;

// === NEWTYPE IDS ===

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u32);

impl AgentId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// === BUNDLE ===

/// Binary selection over items. `items[j]` is true when item `j` is taken.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle {
    items: Vec<bool>,
}

impl Bundle {
    pub fn empty(n_items: usize) -> Self {
        Self {
            items: vec![false; n_items],
        }
    }

    pub fn from_items(items: Vec<bool>) -> Self {
        Self { items }
    }

    /// Build a bundle from the item indices it contains.
    pub fn with_items(n_items: usize, taken: &[ItemId]) -> Self {
        let mut bundle = Self::empty(n_items);
        for &j in taken {
            if j < n_items {
                bundle.items[j] = true;
            }
        }
        bundle
    }

    /// Items whose price is below `free_tolerance`.
    pub fn free_mask(prices: &[Price], free_tolerance: f64) -> Self {
        Self {
            items: prices.iter().map(|&p| p < free_tolerance).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: ItemId) -> bool {
        self.items.get(item).copied().unwrap_or(false)
    }

    pub fn items(&self) -> &[bool] {
        &self.items
    }

    /// Indices of taken items, ascending.
    pub fn taken(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(j, &taken)| taken.then_some(j))
    }

    pub fn count(&self) -> usize {
        self.items.iter().filter(|&&taken| taken).count()
    }

    pub fn cost(&self, prices: &[Price]) -> f64 {
        self.taken().map(|j| prices.get(j).copied().unwrap_or(0.0)).sum()
    }

    /// Elementwise max of two bundles.
    pub fn union(&self, other: &Bundle) -> Bundle {
        let n = self.items.len().max(other.items.len());
        Bundle {
            items: (0..n).map(|j| self.contains(j) || other.contains(j)).collect(),
        }
    }

    /// Compact `0101` rendering used in trace events.
    pub fn to_bitstring(&self) -> String {
        self.items.iter().map(|&b| if b { '1' } else { '0' }).collect()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bitstring())
    }
}
