// Seeded random crew markets for tests and experiments

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::market::MarketInput;
use crate::types::{AgentId, ItemId};

/// Shape of a random market. Agent 0 is the most senior; each step down in
/// seniority lowers the baseline budget by `seniority_step`, so priorities
/// are distinct whenever the step is positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomMarketSpec {
    pub n_agents: usize,
    pub n_items: usize,
    pub capacity: f64,
    /// Utilities are drawn uniformly from `[0, max_utility)`.
    pub max_utility: f64,
    /// Conflict pairs drawn per agent; repeats are possible, self-pairs are not.
    pub conflicts_per_agent: usize,
    pub base_budget: f64,
    pub seniority_step: f64,
}

impl Default for RandomMarketSpec {
    fn default() -> Self {
        Self {
            n_agents: 4,
            n_items: 4,
            capacity: 1.0,
            max_utility: 10.0,
            conflicts_per_agent: 0,
            base_budget: 1.0,
            seniority_step: 0.01,
        }
    }
}

pub fn random_market(seed: u64, shape: &RandomMarketSpec) -> MarketInput {
    let mut rng = StdRng::seed_from_u64(seed);

    let agents = (0..shape.n_agents)
        .map(|i| {
            let utilities = (0..shape.n_items)
                .map(|_| rng.random::<f64>() * shape.max_utility)
                .collect();
            let conflicts: Vec<(ItemId, ItemId)> = if shape.n_items < 2 {
                Vec::new()
            } else {
                (0..shape.conflicts_per_agent)
                    .map(|_| {
                        let a = rng.random_range(0..shape.n_items);
                        // Distinct second item
                        let b = (a + rng.random_range(1..shape.n_items)) % shape.n_items;
                        (a, b)
                    })
                    .collect()
            };
            Agent::new(AgentId::new(i as u32), utilities).with_conflicts(conflicts)
        })
        .collect::<Vec<_>>();

    let budgets0: HashMap<AgentId, f64> = agents
        .iter()
        .enumerate()
        .map(|(rank, agent)| {
            let juniority = (shape.n_agents - 1 - rank) as f64;
            (agent.id, shape.base_budget + juniority * shape.seniority_step)
        })
        .collect();

    MarketInput {
        agents,
        capacities: vec![shape.capacity; shape.n_items],
        budgets0,
    }
}
