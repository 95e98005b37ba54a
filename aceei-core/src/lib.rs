//! Approximate Competitive Equilibrium from Equal Incomes for indivisible
//! items.
//!
//! Agents with additive utilities and pairwise item exclusions are given
//! baseline budgets. [`Aceei`] runs a tâtonnement over item prices: each
//! iteration sweeps every agent's demand across a small budget window
//! ([`subregion`]), screens contested envy-free tie-breaking pairs ([`eftb`]),
//! picks one subregion per agent with a two-phase integer program
//! ([`market::program`]) and moves prices by the clipped excess demand.
//!
//! ```ignore
//! let mut aceei = Aceei::new(agents, capacities, &budgets0, AceeiConfig::default())?;
//! let outcome = aceei.run()?;
//! let (prices, budgets, bundles) = outcome.into_parts().unwrap();
//! ```
//!
//! With the default `instrument` feature every iteration is traced to the
//! `aceei_iteration`, `aceei_choice`, `aceei_price` and `aceei_run` targets.

pub mod aceei;
pub mod agent;
pub mod config;
pub mod demand;
pub mod eftb;
pub mod error;
pub mod market;
pub mod scenario;
pub mod subregion;
pub mod types;

#[cfg(feature = "instrument")]
pub use instrument;

pub use aceei::{Aceei, AceeiOutcome, Allocation, IterationSummary, Termination};
pub use agent::Agent;
pub use config::{AceeiConfig, Tolerances};
pub use demand::{DemandPool, DemandSolver, MilpKnapsack};
pub use eftb::{ActiveConstraints, ConstraintPair, EftbScreener};
pub use error::{AceeiError, ConfigError, DemandError, Phase, ProgramError, SubregionError};
pub use market::{Market, MarketInput};
pub use subregion::{BudgetGrid, Subregion, compute_budget_subregions};
pub use types::*;
