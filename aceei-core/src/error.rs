//! Error types for configuration, demand queries, market programs and runs.

use std::fmt;

use thiserror::Error;

use crate::types::{AgentId, ItemId};

/// Problems detected before the first solve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("delta must be positive and finite (got {0})")]
    NonPositiveDelta(f64),
    #[error("epsilon must be non-negative and finite (got {0})")]
    NegativeEpsilon(f64),
    #[error("tol must be non-negative and finite (got {0})")]
    InvalidTolerance(f64),
    #[error("full_rescreen_period must be at least 1")]
    ZeroRescreenPeriod,
    #[error("demand_workers must be at least 1")]
    ZeroWorkers,
    #[error("market has no agents")]
    NoAgents,
    #[error("market has no items")]
    NoItems,
    #[error("capacity of item {item} must be non-negative and finite (got {capacity})")]
    InvalidCapacity { item: ItemId, capacity: f64 },
    #[error("agent {agent} has {got} utilities but the market has {expected} items")]
    UtilityLength {
        agent: AgentId,
        expected: usize,
        got: usize,
    },
    #[error("agent {agent} utility for item {item} is not finite")]
    NonFiniteUtility { agent: AgentId, item: ItemId },
    #[error("agent {agent} lists conflict ({a}, {b}) outside {n_items} items")]
    ConflictOutOfRange {
        agent: AgentId,
        a: ItemId,
        b: ItemId,
        n_items: usize,
    },
    #[error("agent id {0} appears more than once")]
    DuplicateAgent(AgentId),
    #[error("no baseline budget for agent {0}")]
    MissingBudget(AgentId),
    #[error("budget window of agent {agent} starts below zero ({lower})")]
    NegativeBudgetWindow { agent: AgentId, lower: f64 },
    #[error("budget grid is empty (delta={delta}, epsilon={epsilon})")]
    EmptyGrid { delta: f64, epsilon: f64 },
    #[error("budget grid needs more than {max_points} points (delta={delta}, epsilon={epsilon})")]
    GridTooLarge {
        delta: f64,
        epsilon: f64,
        max_points: usize,
    },
    #[error("invalid json: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e.to_string())
    }
}

/// Failures of a single demand query or of the worker pool serving it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DemandError {
    #[error("budget {0} is negative; the knapsack is infeasible")]
    NegativeBudget(f64),
    #[error("price vector has {got} entries, expected {expected}")]
    PriceLength { expected: usize, got: usize },
    #[error("knapsack solver failed: {0}")]
    Solver(String),
    #[error("demand worker pool is disconnected")]
    Disconnected,
    #[error("failed to start demand worker: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubregionError {
    #[error(transparent)]
    Grid(#[from] ConfigError),
    #[error(transparent)]
    Demand(#[from] DemandError),
}

/// Which of the two market programs failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Clearing,
    BudgetTieBreak,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Clearing => f.write_str("phase-1 clearing"),
            Phase::BudgetTieBreak => f.write_str("phase-2 budget tie-break"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgramError {
    #[error("{0} program is infeasible")]
    Infeasible(Phase),
    #[error("{0} program is unbounded")]
    Unbounded(Phase),
    #[error("{phase} solver failed: {message}")]
    Solver { phase: Phase, message: String },
}

/// Run-level failures. Everything past configuration carries the iteration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AceeiError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("{phase} program infeasible at iteration {iteration}")]
    InfeasibleProgram { phase: Phase, iteration: usize },
    #[error("agent {agent} has {selected} selected subregions at iteration {iteration} (expected 1)")]
    InvariantViolation {
        agent: AgentId,
        iteration: usize,
        selected: usize,
    },
    #[error("solver error at iteration {iteration} ({context}): {message}")]
    Solver {
        iteration: usize,
        context: String,
        message: String,
    },
    #[error("demand oracle for agent {agent} failed at iteration {iteration}: {source}")]
    Demand {
        iteration: usize,
        agent: AgentId,
        #[source]
        source: DemandError,
    },
}

impl AceeiError {
    pub(crate) fn from_program(err: ProgramError, iteration: usize) -> Self {
        match err {
            ProgramError::Infeasible(phase) => AceeiError::InfeasibleProgram { phase, iteration },
            ProgramError::Unbounded(phase) => AceeiError::Solver {
                iteration,
                context: phase.to_string(),
                message: "unbounded".to_string(),
            },
            ProgramError::Solver { phase, message } => AceeiError::Solver {
                iteration,
                context: phase.to_string(),
                message,
            },
        }
    }

    /// Iteration the failure happened in, if it happened inside the loop.
    pub fn iteration(&self) -> Option<usize> {
        match self {
            AceeiError::Configuration(_) => None,
            AceeiError::InfeasibleProgram { iteration, .. }
            | AceeiError::InvariantViolation { iteration, .. }
            | AceeiError::Solver { iteration, .. }
            | AceeiError::Demand { iteration, .. } => Some(*iteration),
        }
    }
}
