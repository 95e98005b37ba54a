// Contested envy-free tie-breaking (EF-TB) screening
//
// A pair (i, li, j, lj) is forbidden when agent i, whose priority is at least
// agent j's, would strictly prefer j's bundle topped up with every free item,
// can afford that superbundle at the top of its own subregion li, and the
// superbundle is valid for i.

use std::collections::BTreeSet;

use crate::agent::Agent;
use crate::subregion::Subregion;
use crate::types::{Budget, Bundle, Price};

/// "Agent `agent_i` may not pick subregion `region_i` while agent `agent_j`
/// picks subregion `region_j`." Agents and subregions are positional indices
/// valid for one iteration's subregion set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintPair {
    pub agent_i: usize,
    pub region_i: usize,
    pub agent_j: usize,
    pub region_j: usize,
}

impl ConstraintPair {
    pub fn new(agent_i: usize, region_i: usize, agent_j: usize, region_j: usize) -> Self {
        Self {
            agent_i,
            region_i,
            agent_j,
            region_j,
        }
    }
}

pub type ActiveConstraints = BTreeSet<ConstraintPair>;

/// Screening context for one iteration: agents, their priorities and the
/// current prices.
#[derive(Debug, Clone, Copy)]
pub struct EftbScreener<'a> {
    agents: &'a [Agent],
    priorities: &'a [Budget],
    prices: &'a [Price],
    affordability_tolerance: f64,
    utility_tolerance: f64,
}

impl<'a> EftbScreener<'a> {
    pub fn new(agents: &'a [Agent], priorities: &'a [Budget], prices: &'a [Price]) -> Self {
        Self {
            agents,
            priorities,
            prices,
            affordability_tolerance: 1e-9,
            utility_tolerance: 1e-12,
        }
    }

    pub fn with_tolerances(mut self, affordability: f64, utility: f64) -> Self {
        self.affordability_tolerance = affordability;
        self.utility_tolerance = utility;
        self
    }

    /// Valid for i, affordable at i's subregion ceiling, and strictly better
    /// for i than its own bundle.
    fn violates(&self, agent_i: &Agent, own: &Subregion, own_utility: f64, superbundle: &Bundle) -> bool {
        if !agent_i.is_valid(superbundle) {
            return false;
        }
        if superbundle.cost(self.prices) > own.budget_upper + self.affordability_tolerance {
            return false;
        }
        agent_i.utility(superbundle) > own_utility + self.utility_tolerance
    }

    /// False when either index has no priority.
    fn outranks(&self, i: usize, j: usize) -> bool {
        match (self.priorities.get(i), self.priorities.get(j)) {
            (Some(pi), Some(pj)) => i != j && pi >= pj,
            _ => false,
        }
    }

    /// Full O(n²·k²) screen over every ordered agent pair.
    pub fn screen_eftb_constraints(&self, regions: &[Vec<Subregion>], free_mask: &Bundle) -> ActiveConstraints {
        // Superbundles only depend on (j, lj)
        let superbundles: Vec<Vec<Bundle>> = regions
            .iter()
            .map(|agent_regions| {
                agent_regions
                    .iter()
                    .map(|region| region.bundle.union(free_mask))
                    .collect()
            })
            .collect();

        // Agents beyond the shorter of the inputs are not screened
        let mut pairs = ActiveConstraints::new();
        for (i, (agent_i, own_regions)) in self.agents.iter().zip(regions).enumerate() {
            for (j, others) in superbundles.iter().enumerate().take(self.agents.len()) {
                if !self.outranks(i, j) {
                    continue;
                }
                for (li, own) in own_regions.iter().enumerate() {
                    let own_utility = agent_i.utility(&own.bundle);
                    for (lj, superbundle) in others.iter().enumerate() {
                        if self.violates(agent_i, own, own_utility, superbundle) {
                            pairs.insert(ConstraintPair::new(i, li, j, lj));
                        }
                    }
                }
            }
        }
        pairs
    }

    /// Re-check only previously active pairs against the new prices and
    /// subregions. Pairs whose indices no longer exist are dropped; pairs that
    /// were never active are not discovered here.
    pub fn rescreen_active_pairs(
        &self,
        active: &ActiveConstraints,
        regions: &[Vec<Subregion>],
        free_mask: &Bundle,
    ) -> ActiveConstraints {
        active
            .iter()
            .copied()
            .filter(|pair| {
                let (Some(agent_i), Some(own), Some(other)) = (
                    self.agents.get(pair.agent_i),
                    regions.get(pair.agent_i).and_then(|r| r.get(pair.region_i)),
                    regions.get(pair.agent_j).and_then(|r| r.get(pair.region_j)),
                ) else {
                    return false;
                };
                if !self.outranks(pair.agent_i, pair.agent_j) {
                    return false;
                }
                let superbundle = other.bundle.union(free_mask);
                self.violates(agent_i, own, agent_i.utility(&own.bundle), &superbundle)
            })
            .collect()
    }
}
