pub mod clearing;
pub mod program;

pub use clearing::*;
pub use program::*;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::error::ConfigError;
use crate::types::{AgentId, Budget};

// === MARKET INSTANCE ===

/// Raw, unvalidated market description as it arrives from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInput {
    pub agents: Vec<Agent>,
    pub capacities: Vec<f64>,
    pub budgets0: HashMap<AgentId, Budget>,
}

impl MarketInput {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Validated agents, item capacities and baseline budgets.
///
/// Agents are addressed by position everywhere inside the loop; `AgentId`
/// only appears at the edges. `budgets0[i]` belongs to `agents[i]` and doubles
/// as its EF-TB priority.
#[derive(Debug, Clone)]
pub struct Market {
    agents: Vec<Agent>,
    capacities: Vec<f64>,
    budgets0: Vec<Budget>,
}

impl Market {
    pub fn new(
        agents: Vec<Agent>,
        capacities: Vec<f64>,
        budgets0: &HashMap<AgentId, Budget>,
    ) -> Result<Self, ConfigError> {
        if agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        if capacities.is_empty() {
            return Err(ConfigError::NoItems);
        }
        for (item, &capacity) in capacities.iter().enumerate() {
            if !(capacity.is_finite() && capacity >= 0.0) {
                return Err(ConfigError::InvalidCapacity { item, capacity });
            }
        }

        let n_items = capacities.len();
        let mut seen = HashSet::new();
        let mut ordered_budgets = Vec::with_capacity(agents.len());
        for agent in &agents {
            if !seen.insert(agent.id) {
                return Err(ConfigError::DuplicateAgent(agent.id));
            }
            if agent.utilities.len() != n_items {
                return Err(ConfigError::UtilityLength {
                    agent: agent.id,
                    expected: n_items,
                    got: agent.utilities.len(),
                });
            }
            if let Some(item) = agent.utilities.iter().position(|u| !u.is_finite()) {
                return Err(ConfigError::NonFiniteUtility {
                    agent: agent.id,
                    item,
                });
            }
            if let Some(&(a, b)) = agent
                .conflicts
                .iter()
                .find(|&&(a, b)| a >= n_items || b >= n_items)
            {
                return Err(ConfigError::ConflictOutOfRange {
                    agent: agent.id,
                    a,
                    b,
                    n_items,
                });
            }
            let budget = budgets0
                .get(&agent.id)
                .copied()
                .ok_or(ConfigError::MissingBudget(agent.id))?;
            ordered_budgets.push(budget);
        }

        Ok(Self {
            agents,
            capacities,
            budgets0: ordered_budgets,
        })
    }

    pub fn from_input(input: MarketInput) -> Result<Self, ConfigError> {
        Self::new(input.agents, input.capacities, &input.budgets0)
    }

    /// Check every budget window `[b0 - epsilon, b0 + epsilon]` stays non-negative.
    pub fn check_budget_windows(&self, epsilon: f64) -> Result<(), ConfigError> {
        for (agent, &b0) in self.agents.iter().zip(&self.budgets0) {
            let lower = b0 - epsilon;
            if !b0.is_finite() || lower < 0.0 {
                return Err(ConfigError::NegativeBudgetWindow {
                    agent: agent.id,
                    lower,
                });
            }
        }
        Ok(())
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn capacities(&self) -> &[f64] {
        &self.capacities
    }

    pub fn budgets0(&self) -> &[Budget] {
        &self.budgets0
    }

    pub fn n_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn n_items(&self) -> usize {
        self.capacities.len()
    }
}
