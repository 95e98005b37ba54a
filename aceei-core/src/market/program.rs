// Two-phase allocation programs over per-agent subregions.
//
// Both phases are built from the same `ProgramInput` by independent calls;
// nothing is carried between them except the pinned phase-1 objective.

use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    default_solver, variable,
};

use crate::eftb::ActiveConstraints;
use crate::error::{Phase, ProgramError};
use crate::subregion::Subregion;
use crate::types::Price;

/// Read-only data shared by both phases.
#[derive(Debug, Clone, Copy)]
pub struct ProgramInput<'a> {
    /// `regions[i]` are agent i's subregions for this iteration.
    pub regions: &'a [Vec<Subregion>],
    pub capacities: &'a [f64],
    pub prices: &'a [Price],
    pub constraints: &'a ActiveConstraints,
}

/// Selector values for one agent after a solve, one per subregion.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub values: Vec<f64>,
}

impl Selection {
    /// Indices of subregions whose selector is above `threshold`.
    pub fn chosen(&self, threshold: f64) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > threshold)
            .map(|(l, _)| l)
            .collect()
    }

    /// The single chosen subregion, or the number selected when that is not one.
    pub fn single(&self, threshold: f64) -> Result<usize, usize> {
        match self.chosen(threshold).as_slice() {
            [only] => Ok(*only),
            other => Err(other.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSolution {
    /// Sum of positive and negative excess demand parts (phase-1 objective).
    pub excess_l1: f64,
    /// Sum of chosen subregion ceilings (phase-2 objective).
    pub budget_total: f64,
    pub selections: Vec<Selection>,
}

// === MODEL ===

struct Columns {
    selectors: Vec<Vec<Variable>>,
    z_pos: Vec<Variable>,
    z_neg: Vec<Variable>,
}

impl Columns {
    fn excess_l1(&self) -> Expression {
        let mut total = Expression::default();
        for (&p, &n) in self.z_pos.iter().zip(&self.z_neg) {
            total.add_mul(1.0, p);
            total.add_mul(1.0, n);
        }
        total
    }

    fn budget_total(&self, regions: &[Vec<Subregion>]) -> Expression {
        let mut total = Expression::default();
        for (agent_regions, selectors) in regions.iter().zip(&self.selectors) {
            for (region, &x) in agent_regions.iter().zip(selectors) {
                total.add_mul(region.budget_upper, x);
            }
        }
        total
    }
}

fn declare(input: &ProgramInput<'_>) -> (ProblemVariables, Columns) {
    let mut vars = ProblemVariables::new();
    let selectors: Vec<Vec<Variable>> = input
        .regions
        .iter()
        .map(|agent_regions| {
            agent_regions
                .iter()
                .map(|_| vars.add(variable().binary()))
                .collect()
        })
        .collect();
    let n_items = input.capacities.len();
    let z_pos: Vec<Variable> = (0..n_items).map(|_| vars.add(variable().min(0.0))).collect();
    let z_neg: Vec<Variable> = (0..n_items).map(|_| vars.add(variable().min(0.0))).collect();
    (
        vars,
        Columns {
            selectors,
            z_pos,
            z_neg,
        },
    )
}

/// Rows common to both phases: one subregion per agent, clearing rows per
/// item, and EF-TB mutual exclusions.
fn constrain<M: SolverModel>(mut model: M, input: &ProgramInput<'_>, cols: &Columns) -> M {
    for selectors in &cols.selectors {
        let mut one = Expression::default();
        for &x in selectors {
            one.add_mul(1.0, x);
        }
        model = model.with(one.eq(1.0));
    }

    for (item, &capacity) in input.capacities.iter().enumerate() {
        // Σ demand - z⁺ + z⁻ against capacity
        let mut row = Expression::default();
        for (agent_regions, selectors) in input.regions.iter().zip(&cols.selectors) {
            for (region, &x) in agent_regions.iter().zip(selectors) {
                if region.bundle.contains(item) {
                    row.add_mul(1.0, x);
                }
            }
        }
        row.add_mul(-1.0, cols.z_pos[item]);
        row.add_mul(1.0, cols.z_neg[item]);

        // Positive price: exact clearing. Zero price: under-demand is free.
        model = if input.prices[item] > 0.0 {
            model.with(row.eq(capacity))
        } else {
            model.with(row.leq(capacity))
        };
    }

    for pair in input.constraints {
        let (Some(&xi), Some(&xj)) = (
            cols.selectors
                .get(pair.agent_i)
                .and_then(|s| s.get(pair.region_i)),
            cols.selectors
                .get(pair.agent_j)
                .and_then(|s| s.get(pair.region_j)),
        ) else {
            continue;
        };
        model = model.with((xi + xj).leq(1.0));
    }
    model
}

fn map_resolution(phase: Phase, err: ResolutionError) -> ProgramError {
    match err {
        ResolutionError::Infeasible => ProgramError::Infeasible(phase),
        ResolutionError::Unbounded => ProgramError::Unbounded(phase),
        other => ProgramError::Solver {
            phase,
            message: other.to_string(),
        },
    }
}

fn read_solution(solution: &impl Solution, input: &ProgramInput<'_>, cols: &Columns) -> ProgramSolution {
    let excess_l1 = cols
        .z_pos
        .iter()
        .chain(&cols.z_neg)
        .map(|&z| solution.value(z))
        .sum();

    let mut budget_total = 0.0;
    let selections = input
        .regions
        .iter()
        .zip(&cols.selectors)
        .map(|(agent_regions, selectors)| {
            let values: Vec<f64> = selectors.iter().map(|&x| solution.value(x)).collect();
            budget_total += agent_regions
                .iter()
                .zip(&values)
                .map(|(region, v)| region.budget_upper * v)
                .sum::<f64>();
            Selection { values }
        })
        .collect();

    ProgramSolution {
        excess_l1,
        budget_total,
        selections,
    }
}

// === PHASES ===

/// Phase 1: minimize total absolute excess demand.
pub fn solve_clearing_phase(input: &ProgramInput<'_>) -> Result<ProgramSolution, ProgramError> {
    let (vars, cols) = declare(input);
    let model = vars.minimise(cols.excess_l1()).using(default_solver);
    let model = constrain(model, input, &cols);
    let solution = model
        .solve()
        .map_err(|e| map_resolution(Phase::Clearing, e))?;
    Ok(read_solution(&solution, input, &cols))
}

/// Phase 2: among allocations whose excess demand is within `pin_tolerance`
/// of `pinned_excess`, minimize the sum of chosen subregion ceilings.
pub fn solve_budget_phase(
    input: &ProgramInput<'_>,
    pinned_excess: f64,
    pin_tolerance: f64,
) -> Result<ProgramSolution, ProgramError> {
    let (vars, cols) = declare(input);
    let model = vars
        .minimise(cols.budget_total(input.regions))
        .using(default_solver)
        .with(cols.excess_l1().leq(pinned_excess + pin_tolerance));
    let model = constrain(model, input, &cols);
    let solution = model
        .solve()
        .map_err(|e| map_resolution(Phase::BudgetTieBreak, e))?;
    Ok(read_solution(&solution, input, &cols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eftb::ConstraintPair;
    use crate::types::Bundle;

    fn region(n: usize, items: &[usize], lo: f64, hi: f64) -> Subregion {
        Subregion {
            bundle: Bundle::with_items(n, items),
            budget_lower: lo,
            budget_upper: hi,
        }
    }

    fn input<'a>(
        regions: &'a [Vec<Subregion>],
        capacities: &'a [f64],
        prices: &'a [f64],
        constraints: &'a ActiveConstraints,
    ) -> ProgramInput<'a> {
        ProgramInput {
            regions,
            capacities,
            prices,
            constraints,
        }
    }

    #[test]
    fn clearing_picks_the_non_overlapping_combination() {
        // Both agents want item 0 cheaply, item 1 is the alternative
        let regions = vec![
            vec![region(2, &[0], 0.9, 1.0), region(2, &[1], 1.02, 1.1)],
            vec![region(2, &[0], 0.9, 1.0), region(2, &[1], 1.02, 1.1)],
        ];
        let none = ActiveConstraints::new();
        let data = input(&regions, &[1.0, 1.0], &[0.5, 0.5], &none);
        let phase1 = solve_clearing_phase(&data).unwrap();
        assert!(phase1.excess_l1.abs() < 1e-6);

        let first = phase1.selections[0].single(0.5).unwrap();
        let second = phase1.selections[1].single(0.5).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn free_items_tolerate_under_demand() {
        let regions = vec![vec![region(2, &[], 1.0, 1.0)]];
        let none = ActiveConstraints::new();
        let data = input(&regions, &[1.0, 3.0], &[0.0, 0.0], &none);
        let phase1 = solve_clearing_phase(&data).unwrap();
        assert!(phase1.excess_l1.abs() < 1e-6);
    }

    #[test]
    fn priced_items_count_under_demand_as_excess() {
        let regions = vec![vec![region(2, &[], 1.0, 1.0)]];
        let none = ActiveConstraints::new();
        let data = input(&regions, &[1.0, 3.0], &[0.2, 0.0], &none);
        let phase1 = solve_clearing_phase(&data).unwrap();
        assert!((phase1.excess_l1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn budget_phase_prefers_the_smaller_ceiling_among_ties() {
        let regions = vec![vec![region(1, &[0], 0.9, 0.95), region(1, &[0], 1.0, 1.1)]];
        let none = ActiveConstraints::new();
        let data = input(&regions, &[1.0], &[0.5], &none);
        let phase1 = solve_clearing_phase(&data).unwrap();
        let phase2 = solve_budget_phase(&data, phase1.excess_l1, 1e-7).unwrap();
        assert_eq!(phase2.selections[0].single(0.5), Ok(0));
        assert!((phase2.budget_total - 0.95).abs() < 1e-6);
    }

    #[test]
    fn eftb_rows_exclude_the_forbidden_combination() {
        let regions = vec![
            vec![region(2, &[0], 1.0, 1.0), region(2, &[1], 1.02, 1.1)],
            vec![region(2, &[1], 1.0, 1.0), region(2, &[0], 1.02, 1.1)],
        ];
        // Without the pair, (0, 0) clears and has the smallest ceilings
        let mut pairs = ActiveConstraints::new();
        pairs.insert(ConstraintPair::new(0, 0, 1, 0));
        let data = input(&regions, &[1.0, 1.0], &[0.5, 0.5], &pairs);
        let phase1 = solve_clearing_phase(&data).unwrap();
        assert!(phase1.excess_l1.abs() < 1e-6);
        let phase2 = solve_budget_phase(&data, phase1.excess_l1, 1e-7).unwrap();
        assert_eq!(phase2.selections[0].single(0.5), Ok(1));
        assert_eq!(phase2.selections[1].single(0.5), Ok(1));
    }

    #[test]
    fn selection_reports_how_many_were_chosen() {
        let selection = Selection {
            values: vec![1.0, 0.0, 1.0],
        };
        assert_eq!(selection.chosen(0.5), vec![0, 2]);
        assert_eq!(selection.single(0.5), Err(2));
        assert_eq!(Selection { values: vec![0.0] }.single(0.5), Err(0));
    }
}
