// Budget subregions: piecewise-constant demand over a local budget window

use serde::{Deserialize, Serialize};

use crate::demand::DemandPool;
use crate::error::{ConfigError, SubregionError};
use crate::types::{Budget, Bundle, Price};

/// Over every budget in `[budget_lower, budget_upper]` the agent demands `bundle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subregion {
    pub bundle: Bundle,
    pub budget_lower: Budget,
    pub budget_upper: Budget,
}

// === BUDGET GRID ===

/// Upper bound on grid points per agent and iteration.
pub const MAX_GRID_POINTS: usize = 10_000;

/// Validated grid shape: `budget0 - epsilon, budget0 - epsilon + delta, ...`
/// up to `budget0 + epsilon` (inclusive within `tolerance`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetGrid {
    delta: f64,
    epsilon: f64,
    steps: usize,
}

impl BudgetGrid {
    pub fn new(delta: f64, epsilon: f64, tolerance: f64) -> Result<Self, ConfigError> {
        if !(delta.is_finite() && delta > 0.0 && epsilon.is_finite() && epsilon >= 0.0) {
            return Err(ConfigError::EmptyGrid { delta, epsilon });
        }
        let steps = ((2.0 * epsilon + tolerance.max(0.0)) / delta).floor();
        if !(steps < MAX_GRID_POINTS as f64) {
            return Err(ConfigError::GridTooLarge {
                delta,
                epsilon,
                max_points: MAX_GRID_POINTS,
            });
        }
        let steps = steps as usize;
        Ok(Self {
            delta,
            epsilon,
            steps,
        })
    }

    pub fn len(&self) -> usize {
        self.steps + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Grid points around `budget0`, ascending. Each point is computed from
    /// the lower end directly so rounding does not accumulate.
    pub fn points(&self, budget0: Budget) -> Vec<Budget> {
        let lower = budget0 - self.epsilon;
        (0..=self.steps)
            .map(|k| lower + k as f64 * self.delta)
            .collect()
    }
}

// === COLLAPSE ===

/// Merge consecutive grid points with identical bundles into subregions.
///
/// Only equality of neighbours is tested, so a bundle that reappears after a
/// different one opens a fresh subregion.
pub fn collapse_subregions(budgets: &[Budget], bundles: Vec<Bundle>) -> Vec<Subregion> {
    let mut regions: Vec<Subregion> = Vec::new();
    for (&budget, bundle) in budgets.iter().zip(bundles) {
        match regions.last_mut() {
            Some(open) if open.bundle == bundle => open.budget_upper = budget,
            _ => regions.push(Subregion {
                bundle,
                budget_lower: budget,
                budget_upper: budget,
            }),
        }
    }
    regions
}

/// Sweep the budget grid around `budget0` through the agent's demand pool and
/// compress the answers into ordered subregions.
pub fn compute_budget_subregions(
    pool: &DemandPool,
    prices: &[Price],
    grid: &BudgetGrid,
    budget0: Budget,
) -> Result<Vec<Subregion>, SubregionError> {
    let budgets = grid.points(budget0);
    let bundles = pool.solve_many(prices, &budgets)?;
    Ok(collapse_subregions(&budgets, bundles))
}

/// Same as [`compute_budget_subregions`] but validates `delta`/`epsilon`
/// first, before any solve is attempted.
pub fn compute_budget_subregions_with(
    pool: &DemandPool,
    prices: &[Price],
    delta: f64,
    epsilon: f64,
    budget0: Budget,
    grid_tolerance: f64,
) -> Result<Vec<Subregion>, SubregionError> {
    let grid = BudgetGrid::new(delta, epsilon, grid_tolerance)?;
    compute_budget_subregions(pool, prices, &grid, budget0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::types::AgentId;

    #[test]
    fn grid_includes_right_endpoint() {
        let grid = BudgetGrid::new(0.1, 0.3, 1e-9).unwrap();
        let points = grid.points(1.0);
        assert_eq!(points.len(), 7);
        assert!((points[0] - 0.7).abs() < 1e-12);
        assert!((points[6] - 1.3).abs() < 1e-9);
    }

    #[test]
    fn coarse_grid_is_a_single_point() {
        let grid = BudgetGrid::new(0.5, 0.1, 1e-9).unwrap();
        assert_eq!(grid.points(2.0).len(), 1);
    }

    #[test]
    fn empty_grid_is_rejected() {
        assert!(matches!(
            BudgetGrid::new(0.0, 0.1, 1e-9),
            Err(ConfigError::EmptyGrid { .. })
        ));
        assert!(matches!(
            BudgetGrid::new(0.1, -0.1, 1e-9),
            Err(ConfigError::EmptyGrid { .. })
        ));
    }

    #[test]
    fn oversized_grid_is_rejected() {
        assert!(matches!(
            BudgetGrid::new(1e-9, 1.0, 1e-9),
            Err(ConfigError::GridTooLarge { max_points: MAX_GRID_POINTS, .. })
        ));
        // Largest accepted grid sits exactly at the cap
        let delta = 1.0 / (MAX_GRID_POINTS - 1) as f64;
        let grid = BudgetGrid::new(delta, 0.5, 1e-9).unwrap();
        assert_eq!(grid.len(), MAX_GRID_POINTS);
    }

    #[test]
    fn collapse_merges_runs_and_keeps_reappearing_bundles_separate() {
        let a = Bundle::with_items(2, &[0]);
        let b = Bundle::with_items(2, &[0, 1]);
        let budgets = [1.0, 1.1, 1.2, 1.3, 1.4];
        let bundles = vec![a.clone(), a.clone(), b.clone(), a.clone(), a.clone()];
        let regions = collapse_subregions(&budgets, bundles);

        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].bundle, a);
        assert_eq!((regions[0].budget_lower, regions[0].budget_upper), (1.0, 1.1));
        assert_eq!(regions[1].bundle, b);
        assert_eq!((regions[1].budget_lower, regions[1].budget_upper), (1.2, 1.2));
        assert_eq!(regions[2].bundle, a);
        assert_eq!((regions[2].budget_lower, regions[2].budget_upper), (1.3, 1.4));
    }

    #[test]
    fn last_point_closes_the_open_subregion() {
        let a = Bundle::with_items(1, &[]);
        let regions = collapse_subregions(&[0.5, 0.6, 0.7], vec![a.clone(), a.clone(), a]);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].budget_upper, 0.7);
    }

    #[test]
    fn invalid_grid_fails_before_any_solve() {
        let agent = Agent::new(AgentId(0), vec![1.0]);
        let pool = DemandPool::spawn(&agent, 1).unwrap();
        let err = compute_budget_subregions_with(&pool, &[0.5], 0.0, 0.1, 1.0, 1e-9).unwrap_err();
        assert!(matches!(err, SubregionError::Grid(ConfigError::EmptyGrid { .. })));

        let regions = compute_budget_subregions_with(&pool, &[0.5], 0.1, 0.1, 1.0, 1e-9).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bundle, Bundle::with_items(1, &[0]));
    }
}
