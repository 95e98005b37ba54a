use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    default_solver, variable,
};

use crate::agent::Agent;
use crate::error::DemandError;
use crate::types::{Budget, Bundle, ItemId, Price, Utility};

/// Slack allowed between a returned bundle's cost and the budget before the
/// solution is rejected as a solver fault.
const BUDGET_CHECK_SLACK: f64 = 1e-6;

/// A standing demand program for one agent.
///
/// The objective and conflict rows are set at construction. Between queries
/// only the budget row changes: `set_prices` rewrites its coefficients and
/// `set_budget` its right-hand side.
pub trait DemandSolver: Send {
    fn n_items(&self) -> usize;

    fn set_prices(&mut self, prices: &[Price]) -> Result<(), DemandError>;

    fn set_budget(&mut self, budget: Budget) -> Result<(), DemandError>;

    /// Utility-maximizing affordable bundle under the current budget row.
    fn solve(&mut self) -> Result<Bundle, DemandError>;

    fn demand(&mut self, prices: &[Price], budget: Budget) -> Result<Bundle, DemandError> {
        self.set_prices(prices)?;
        self.set_budget(budget)?;
        self.solve()
    }
}

// === MILP KNAPSACK ===

/// 0/1 knapsack with pairwise exclusions. The row data (utilities,
/// normalized conflicts, budget coefficients and bound) persists across
/// queries; the `good_lp` model itself is rebuilt from it on every solve that
/// misses the fast paths, since a built model cannot be edited in place.
///
/// ```text
/// max  Σ u_j x_j
/// s.t. Σ p_j x_j <= b
///      x_a + x_b <= 1       for every conflict (a, b)
///      x_j ∈ {0, 1}
/// ```
#[derive(Debug, Clone)]
pub struct MilpKnapsack {
    utilities: Vec<Utility>,
    conflicts: Vec<(ItemId, ItemId)>,
    budget_row: Vec<Price>,
    budget_rhs: Budget,
}

impl MilpKnapsack {
    pub fn new(utilities: Vec<Utility>, conflicts: &[(ItemId, ItemId)]) -> Self {
        let n_items = utilities.len();
        let mut rows: Vec<(ItemId, ItemId)> = conflicts
            .iter()
            // (a, a) stays: it rules item a out entirely
            .filter(|&&(a, b)| a < n_items && b < n_items)
            .map(|&(a, b)| (a.min(b), a.max(b)))
            .collect();
        rows.sort_unstable();
        rows.dedup();

        Self {
            utilities,
            conflicts: rows,
            budget_row: vec![0.0; n_items],
            budget_rhs: 0.0,
        }
    }

    pub fn for_agent(agent: &Agent) -> Self {
        Self::new(agent.utilities.clone(), &agent.conflicts)
    }

    fn is_valid(&self, bundle: &Bundle) -> bool {
        self.conflicts
            .iter()
            .all(|&(a, b)| !(bundle.contains(a) && bundle.contains(b)))
    }

    /// Every positively-valued item. When this is valid and affordable it is
    /// the optimum outright.
    fn wish_list(&self) -> Bundle {
        Bundle::from_items(self.utilities.iter().map(|&u| u > 0.0).collect())
    }

    fn solve_program(&self) -> Result<Bundle, DemandError> {
        let n = self.utilities.len();
        // Unvalued items never improve the objective, so they get no column
        let mut vars = ProblemVariables::new();
        let columns: Vec<Option<Variable>> = self
            .utilities
            .iter()
            .map(|&u| (u > 0.0).then(|| vars.add(variable().binary())))
            .collect();

        let mut objective = Expression::default();
        let mut spend = Expression::default();
        for (j, column) in columns.iter().enumerate() {
            if let Some(x) = *column {
                objective.add_mul(self.utilities[j], x);
                spend.add_mul(self.budget_row[j], x);
            }
        }

        let mut model = vars
            .maximise(objective)
            .using(default_solver)
            .with(spend.leq(self.budget_rhs));
        for &(a, b) in &self.conflicts {
            if let (Some(xa), Some(xb)) = (columns[a], columns[b]) {
                model = model.with((xa + xb).leq(1.0));
            }
        }

        let solution = model.solve().map_err(|e| match e {
            ResolutionError::Infeasible => DemandError::NegativeBudget(self.budget_rhs),
            other => DemandError::Solver(other.to_string()),
        })?;

        let mut items = vec![false; n];
        for (j, column) in columns.iter().enumerate() {
            if let Some(x) = *column {
                items[j] = solution.value(x) > 0.5;
            }
        }
        Ok(Bundle::from_items(items))
    }
}

impl DemandSolver for MilpKnapsack {
    fn n_items(&self) -> usize {
        self.utilities.len()
    }

    fn set_prices(&mut self, prices: &[Price]) -> Result<(), DemandError> {
        if prices.len() != self.budget_row.len() {
            return Err(DemandError::PriceLength {
                expected: self.budget_row.len(),
                got: prices.len(),
            });
        }
        self.budget_row.copy_from_slice(prices);
        Ok(())
    }

    fn set_budget(&mut self, budget: Budget) -> Result<(), DemandError> {
        if !(budget >= 0.0) {
            return Err(DemandError::NegativeBudget(budget));
        }
        self.budget_rhs = budget;
        Ok(())
    }

    fn solve(&mut self) -> Result<Bundle, DemandError> {
        let wish_list = self.wish_list();
        if wish_list.count() == 0 {
            return Ok(Bundle::empty(self.utilities.len()));
        }
        if self.is_valid(&wish_list) && wish_list.cost(&self.budget_row) <= self.budget_rhs {
            return Ok(wish_list);
        }

        let bundle = self.solve_program()?;
        if bundle.cost(&self.budget_row) > self.budget_rhs + BUDGET_CHECK_SLACK {
            return Err(DemandError::Solver(format!(
                "bundle {bundle} costs {} over budget {}",
                bundle.cost(&self.budget_row),
                self.budget_rhs
            )));
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Best utility over all valid affordable subsets.
    fn brute_force_best(utilities: &[f64], conflicts: &[(usize, usize)], prices: &[f64], budget: f64) -> f64 {
        let n = utilities.len();
        let mut best = 0.0;
        for mask in 0u32..(1 << n) {
            let taken: Vec<usize> = (0..n).filter(|j| mask & (1 << j) != 0).collect();
            let bundle = Bundle::with_items(n, &taken);
            let valid = conflicts
                .iter()
                .all(|&(a, b)| !(bundle.contains(a) && bundle.contains(b)));
            if !valid || bundle.cost(prices) > budget + 1e-9 {
                continue;
            }
            let u: f64 = taken.iter().map(|&j| utilities[j]).sum();
            if u > best {
                best = u;
            }
        }
        best
    }

    #[test]
    fn free_items_are_all_taken() {
        let mut solver = MilpKnapsack::new(vec![3.0, 1.0, 2.0], &[]);
        let bundle = solver.demand(&[0.0, 0.0, 0.0], 0.0).unwrap();
        assert_eq!(bundle, Bundle::with_items(3, &[0, 1, 2]));
    }

    #[test]
    fn budget_forces_the_preferred_item() {
        let mut solver = MilpKnapsack::new(vec![10.0, 1.0], &[]);
        let bundle = solver.demand(&[0.6, 0.6], 1.0).unwrap();
        assert_eq!(bundle, Bundle::with_items(2, &[0]));
    }

    #[test]
    fn conflicts_are_respected_even_when_free() {
        let mut solver = MilpKnapsack::new(vec![5.0, 4.0, 1.0], &[(0, 1)]);
        let bundle = solver.demand(&[0.0, 0.0, 0.0], 1.0).unwrap();
        assert_eq!(bundle, Bundle::with_items(3, &[0, 2]));
    }

    #[test]
    fn self_conflict_excludes_the_item() {
        let mut solver = MilpKnapsack::new(vec![5.0, 1.0], &[(0, 0)]);
        let bundle = solver.demand(&[0.0, 0.0], 1.0).unwrap();
        assert_eq!(bundle, Bundle::with_items(2, &[1]));
    }

    #[test]
    fn conflict_rows_hold_across_price_and_budget_changes() {
        let mut solver = MilpKnapsack::new(vec![5.0, 4.0, 3.0], &[(0, 1)]);
        let first = solver.demand(&[0.4, 0.4, 0.4], 1.0).unwrap();
        assert_eq!(first, Bundle::with_items(3, &[0, 2]));

        // Item 0 priced out; 1 and 2 now fit together
        let second = solver.demand(&[2.0, 0.3, 0.3], 1.0).unwrap();
        assert_eq!(second, Bundle::with_items(3, &[1, 2]));

        // Everything cheap again: the conflict still bars {0, 1}
        let third = solver.demand(&[0.1, 0.1, 0.1], 5.0).unwrap();
        assert_eq!(third, Bundle::with_items(3, &[0, 2]));
    }

    #[test]
    fn unvalued_items_are_never_taken() {
        let mut solver = MilpKnapsack::new(vec![0.0, 2.0], &[]);
        let bundle = solver.demand(&[0.0, 5.0], 1.0).unwrap();
        assert_eq!(bundle, Bundle::empty(2));
    }

    #[test]
    fn negative_budget_is_rejected() {
        let mut solver = MilpKnapsack::new(vec![1.0], &[]);
        assert_eq!(
            solver.demand(&[1.0], -0.5),
            Err(DemandError::NegativeBudget(-0.5))
        );
    }

    #[test]
    fn price_length_mismatch_is_rejected() {
        let mut solver = MilpKnapsack::new(vec![1.0, 2.0], &[]);
        assert_eq!(
            solver.set_prices(&[1.0]),
            Err(DemandError::PriceLength {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn matches_brute_force_on_small_instances() {
        let utilities = [6.0, 5.0, 4.0, 3.0, 2.5, 1.0];
        let conflicts = [(0, 1), (2, 3), (1, 4)];
        let prices = [0.5, 0.3, 0.4, 0.2, 0.35, 0.1];
        let mut solver = MilpKnapsack::new(utilities.to_vec(), &conflicts);

        for budget in [0.0, 0.15, 0.3, 0.55, 0.8, 1.05, 1.4, 2.0] {
            let bundle = solver.demand(&prices, budget).unwrap();
            assert!(bundle.cost(&prices) <= budget + 1e-6, "budget {budget}: over budget");
            assert!(
                conflicts.iter().all(|&(a, b)| !(bundle.contains(a) && bundle.contains(b))),
                "budget {budget}: conflict violated by {bundle}"
            );
            let got: f64 = bundle.taken().map(|j| utilities[j]).sum();
            let best = brute_force_best(&utilities, &conflicts, &prices, budget);
            assert!((got - best).abs() < 1e-6, "budget {budget}: got {got}, best {best}");
        }
    }
}
