// Demand oracle: per-agent knapsack solvers behind a worker pool
//
// - knapsack  DemandSolver trait and the MILP-backed knapsack
// - pool      Fixed-size pool of workers, each owning one solver instance

pub mod knapsack;
pub mod pool;

pub use knapsack::{DemandSolver, MilpKnapsack};
pub use pool::DemandPool;
