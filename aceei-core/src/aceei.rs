// Tâtonnement loop: subregions -> EF-TB screen -> two-phase program ->
// clearing error -> price update.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::config::AceeiConfig;
use crate::demand::{DemandPool, DemandSolver, MilpKnapsack};
use crate::eftb::{ActiveConstraints, EftbScreener};
use crate::error::{AceeiError, SubregionError};
use crate::market::{
    Market, ProgramInput, clearing_error, clip_excess_demand, excess_demand, solve_budget_phase,
    solve_clearing_phase, update_prices,
};
use crate::subregion::{BudgetGrid, Subregion, compute_budget_subregions};
use crate::types::{AgentId, Budget, Bundle, Price};

// === OUTCOME ===

/// Prices, budgets and bundles of one iterate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub prices: Vec<Price>,
    pub budgets: BTreeMap<AgentId, Budget>,
    pub bundles: BTreeMap<AgentId, Bundle>,
    pub clearing_error: f64,
    pub iteration: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// Clearing error fell to `tol`; the allocation is this iterate.
    Converged { iteration: usize },
    /// `max_iter` iterations ran without converging; the allocation is the best one seen.
    IterationLimit,
    /// `max_iter == 0`.
    NotStarted,
    /// A later iteration failed; the allocation is the best one before the failure.
    Aborted { error: AceeiError },
}

impl Termination {
    pub fn label(&self) -> &'static str {
        match self {
            Termination::Converged { .. } => "converged",
            Termination::IterationLimit => "iteration_limit",
            Termination::NotStarted => "not_started",
            Termination::Aborted { .. } => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: usize,
    pub clearing_error: f64,
    /// Lowest clearing error up to and including this iteration.
    pub best_error: f64,
    pub phase1_objective: f64,
    pub constraints: usize,
    pub full_rescreen: bool,
    pub subregions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AceeiOutcome {
    pub termination: Termination,
    pub allocation: Option<Allocation>,
    pub history: Vec<IterationSummary>,
}

impl AceeiOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self.termination, Termination::Converged { .. })
    }

    pub fn iterations(&self) -> usize {
        self.history.len()
    }

    pub fn best_error(&self) -> Option<f64> {
        self.allocation.as_ref().map(|a| a.clearing_error)
    }

    /// `(prices, budgets, bundles)` for downstream consumers.
    pub fn into_parts(
        self,
    ) -> Option<(Vec<Price>, BTreeMap<AgentId, Budget>, BTreeMap<AgentId, Bundle>)> {
        self.allocation.map(|a| (a.prices, a.budgets, a.bundles))
    }
}

/// Everything one iteration produced, before the price update.
struct Iterate {
    regions: Vec<Vec<Subregion>>,
    chosen: Vec<usize>,
    #[cfg_attr(not(feature = "instrument"), allow(dead_code))]
    excess: Vec<f64>,
    clipped: Vec<f64>,
    clearing_error: f64,
    phase1_objective: f64,
    full_rescreen: bool,
}

impl Iterate {
    fn chosen_region(&self, agent: usize) -> &Subregion {
        &self.regions[agent][self.chosen[agent]]
    }

    fn allocation(&self, agents: &[Agent], prices: &[Price], iteration: usize) -> Allocation {
        let mut budgets = BTreeMap::new();
        let mut bundles = BTreeMap::new();
        for (i, agent) in agents.iter().enumerate() {
            let region = self.chosen_region(i);
            budgets.insert(agent.id, region.budget_upper);
            bundles.insert(agent.id, region.bundle.clone());
        }
        Allocation {
            prices: prices.to_vec(),
            budgets,
            bundles,
            clearing_error: self.clearing_error,
            iteration,
        }
    }
}

// === ORCHESTRATOR ===

#[derive(Debug)]
pub struct Aceei {
    market: Market,
    config: AceeiConfig,
    grid: BudgetGrid,
    prices: Vec<Price>,
    active: ActiveConstraints,
}

impl Aceei {
    pub fn new(
        agents: Vec<Agent>,
        capacities: Vec<f64>,
        budgets0: &HashMap<AgentId, Budget>,
        config: AceeiConfig,
    ) -> Result<Self, AceeiError> {
        let market = Market::new(agents, capacities, budgets0)?;
        Self::from_market(market, config)
    }

    /// Validates the configuration against the market; prices start at zero.
    pub fn from_market(market: Market, config: AceeiConfig) -> Result<Self, AceeiError> {
        config.validate()?;
        market.check_budget_windows(config.epsilon)?;
        let grid = BudgetGrid::new(config.delta, config.epsilon, config.tolerances.grid)?;
        let prices = vec![0.0; market.n_items()];
        Ok(Self {
            market,
            config,
            grid,
            prices,
            active: ActiveConstraints::new(),
        })
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn config(&self) -> &AceeiConfig {
        &self.config
    }

    /// Current prices. After `run` these are the prices the next iteration
    /// would have used.
    pub fn prices(&self) -> &[Price] {
        &self.prices
    }

    pub fn active_constraints(&self) -> &ActiveConstraints {
        &self.active
    }

    /// Run the loop until convergence or `max_iter`.
    pub fn run(&mut self) -> Result<AceeiOutcome, AceeiError> {
        self.run_with(MilpKnapsack::for_agent)
    }

    /// Same loop with demand answered by solvers from `factory`, called once
    /// per worker of each agent's pool.
    pub fn run_with<S, F>(&mut self, mut factory: F) -> Result<AceeiOutcome, AceeiError>
    where
        S: DemandSolver + 'static,
        F: FnMut(&Agent) -> S,
    {
        if self.config.max_iter == 0 {
            let outcome = AceeiOutcome {
                termination: Termination::NotStarted,
                allocation: None,
                history: Vec::new(),
            };
            trace_run(&outcome);
            return Ok(outcome);
        }

        let pools = self.spawn_pools(&mut factory)?;
        let result = self.iterate(&pools);
        for pool in pools {
            pool.shutdown();
        }

        let outcome = result?;
        trace_run(&outcome);
        Ok(outcome)
    }

    fn spawn_pools<S, F>(&self, factory: &mut F) -> Result<Vec<DemandPool>, AceeiError>
    where
        S: DemandSolver + 'static,
        F: FnMut(&Agent) -> S,
    {
        self.market
            .agents()
            .iter()
            .map(|agent| {
                DemandPool::spawn_with(self.config.demand_workers, agent.n_items(), || factory(agent))
                    .map_err(|source| AceeiError::Demand {
                        iteration: 0,
                        agent: agent.id,
                        source,
                    })
            })
            .collect()
    }

    fn iterate(&mut self, pools: &[DemandPool]) -> Result<AceeiOutcome, AceeiError> {
        let mut best: Option<Allocation> = None;
        let mut history = Vec::new();

        for iteration in 0..self.config.max_iter {
            let step = match self.step(iteration, pools) {
                Ok(step) => step,
                Err(error) => {
                    return match best {
                        Some(allocation) => Ok(AceeiOutcome {
                            termination: Termination::Aborted { error },
                            allocation: Some(allocation),
                            history,
                        }),
                        None => Err(error),
                    };
                }
            };

            let current = step.allocation(self.market.agents(), &self.prices, iteration);
            if best
                .as_ref()
                .is_none_or(|b| step.clearing_error < b.clearing_error)
            {
                best = Some(current.clone());
            }
            let best_error = best
                .as_ref()
                .map_or(step.clearing_error, |b| b.clearing_error);

            let summary = IterationSummary {
                iteration,
                clearing_error: step.clearing_error,
                best_error,
                phase1_objective: step.phase1_objective,
                constraints: self.active.len(),
                full_rescreen: step.full_rescreen,
                subregions: step.regions.iter().map(Vec::len).sum(),
            };
            self.trace_iteration(&summary, &step);
            history.push(summary);

            if step.clearing_error <= self.config.tol {
                return Ok(AceeiOutcome {
                    termination: Termination::Converged { iteration },
                    allocation: Some(current),
                    history,
                });
            }
            update_prices(&mut self.prices, &step.clipped, self.config.delta);
        }

        Ok(AceeiOutcome {
            termination: Termination::IterationLimit,
            allocation: best,
            history,
        })
    }

    fn step(&mut self, iteration: usize, pools: &[DemandPool]) -> Result<Iterate, AceeiError> {
        let tolerances = self.config.tolerances;
        let agents = self.market.agents();

        // 1. subregions at current prices
        let mut regions = Vec::with_capacity(agents.len());
        for ((agent, pool), &budget0) in agents.iter().zip(pools).zip(self.market.budgets0()) {
            let agent_regions = compute_budget_subregions(pool, &self.prices, &self.grid, budget0)
                .map_err(|e| match e {
                    SubregionError::Grid(config) => AceeiError::Configuration(config),
                    SubregionError::Demand(source) => AceeiError::Demand {
                        iteration,
                        agent: agent.id,
                        source,
                    },
                })?;
            regions.push(agent_regions);
        }

        // 2. EF-TB screen
        let free_mask = Bundle::free_mask(&self.prices, tolerances.free_price);
        let screener = EftbScreener::new(agents, self.market.budgets0(), &self.prices)
            .with_tolerances(tolerances.affordability, tolerances.utility);
        let full_rescreen = self.config.is_full_rescreen(iteration);
        let active = if full_rescreen {
            screener.screen_eftb_constraints(&regions, &free_mask)
        } else {
            screener.rescreen_active_pairs(&self.active, &regions, &free_mask)
        };
        self.active = active;

        // 3. clearing then budget tie-break
        let input = ProgramInput {
            regions: &regions,
            capacities: self.market.capacities(),
            prices: &self.prices,
            constraints: &self.active,
        };
        let phase1 =
            solve_clearing_phase(&input).map_err(|e| AceeiError::from_program(e, iteration))?;
        let phase2 = solve_budget_phase(&input, phase1.excess_l1, tolerances.objective_pin)
            .map_err(|e| AceeiError::from_program(e, iteration))?;

        // 4. exactly one subregion per agent
        let chosen = agents
            .iter()
            .zip(&phase2.selections)
            .map(|(agent, selection)| {
                selection
                    .single(tolerances.selection)
                    .map_err(|selected| AceeiError::InvariantViolation {
                        agent: agent.id,
                        iteration,
                        selected,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // 5. clearing error from the chosen bundles
        let excess = excess_demand(
            regions.iter().zip(&chosen).map(|(r, &l)| &r[l].bundle),
            self.market.capacities(),
        );
        let clipped = clip_excess_demand(&excess, &self.prices);
        let error = clearing_error(&clipped);

        Ok(Iterate {
            regions,
            chosen,
            excess,
            clipped,
            clearing_error: error,
            phase1_objective: phase1.excess_l1,
            full_rescreen,
        })
    }

    #[cfg(feature = "instrument")]
    fn trace_iteration(&self, summary: &IterationSummary, step: &Iterate) {
        tracing::info!(
            target: "aceei_iteration",
            iteration = summary.iteration,
            clearing_error = summary.clearing_error,
            best_error = summary.best_error,
            phase1_objective = summary.phase1_objective,
            constraints = summary.constraints,
            full_rescreen = summary.full_rescreen,
            subregions = summary.subregions,
        );

        for (i, agent) in self.market.agents().iter().enumerate() {
            let region = step.chosen_region(i);
            let items = region.bundle.to_bitstring();
            tracing::info!(
                target: "aceei_choice",
                iteration = summary.iteration,
                agent_id = agent.id.0,
                budget = region.budget_upper,
                budget_lower = region.budget_lower,
                subregion = step.chosen[i],
                items = items.as_str(),
            );
        }

        for (item, ((&price, &excess), &clipped)) in self
            .prices
            .iter()
            .zip(&step.excess)
            .zip(&step.clipped)
            .enumerate()
        {
            tracing::info!(
                target: "aceei_price",
                iteration = summary.iteration,
                item = item,
                price = price,
                excess_demand = excess,
                clipped = clipped,
            );
        }
    }

    #[cfg(not(feature = "instrument"))]
    fn trace_iteration(&self, _summary: &IterationSummary, _step: &Iterate) {}
}

#[cfg(feature = "instrument")]
fn trace_run(outcome: &AceeiOutcome) {
    tracing::info!(
        target: "aceei_run",
        termination = outcome.termination.label(),
        iterations = outcome.iterations(),
        best_error = outcome.best_error().unwrap_or(f64::NAN),
    );
}

#[cfg(not(feature = "instrument"))]
fn trace_run(_outcome: &AceeiOutcome) {}
