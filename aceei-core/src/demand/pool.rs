use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};

use crate::agent::Agent;
use crate::error::DemandError;
use crate::types::{Budget, Bundle, Price};

use super::knapsack::{DemandSolver, MilpKnapsack};

type Reply = (usize, Result<Bundle, DemandError>);

struct Job {
    slot: usize,
    prices: Arc<[Price]>,
    budget: Budget,
    reply: Sender<Reply>,
}

/// Fixed set of worker threads for one agent. Each worker owns its solver
/// outright; nothing mutable is shared between workers.
///
/// Workers live until [`DemandPool::shutdown`] (or drop), which closes the job
/// queue and joins every thread.
pub struct DemandPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    n_items: usize,
}

impl DemandPool {
    /// Pool of `workers` MILP knapsack solvers for `agent`.
    pub fn spawn(agent: &Agent, workers: usize) -> Result<Self, DemandError> {
        Self::spawn_with(workers, agent.n_items(), || MilpKnapsack::for_agent(agent))
    }

    /// Pool whose workers each get a solver from `factory`. The solver is
    /// built on the calling thread and moved into its worker.
    pub fn spawn_with<S, F>(workers: usize, n_items: usize, mut factory: F) -> Result<Self, DemandError>
    where
        S: DemandSolver + 'static,
        F: FnMut() -> S,
    {
        let (job_tx, job_rx) = unbounded::<Job>();
        let mut pool = Self {
            jobs: Some(job_tx),
            workers: Vec::with_capacity(workers.max(1)),
            n_items,
        };

        for index in 0..workers.max(1) {
            let jobs = job_rx.clone();
            let mut solver = factory();
            let handle = thread::Builder::new()
                .name(format!("demand-worker-{index}"))
                .spawn(move || {
                    for job in jobs.iter() {
                        let result = solver.demand(&job.prices, job.budget);
                        // Receiver is gone when the batch already failed
                        let _ = job.reply.send((job.slot, result));
                    }
                })
                .map_err(|e| DemandError::Spawn(e.to_string()))?;
            pool.workers.push(handle);
        }

        #[cfg(feature = "instrument")]
        tracing::debug!(target: "demand_pool", workers = pool.workers.len(), n_items, "started");

        Ok(pool)
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Demand at every budget in `budgets`, in input order. Queries run
    /// concurrently across workers; the call blocks until all are answered.
    pub fn solve_many(&self, prices: &[Price], budgets: &[Budget]) -> Result<Vec<Bundle>, DemandError> {
        if prices.len() != self.n_items {
            return Err(DemandError::PriceLength {
                expected: self.n_items,
                got: prices.len(),
            });
        }
        if let Some(&budget) = budgets.iter().find(|&&b| !(b >= 0.0)) {
            return Err(DemandError::NegativeBudget(budget));
        }
        let jobs = self.jobs.as_ref().ok_or(DemandError::Disconnected)?;

        let prices: Arc<[Price]> = Arc::from(prices);
        let (reply_tx, reply_rx) = unbounded::<Reply>();
        for (slot, &budget) in budgets.iter().enumerate() {
            jobs.send(Job {
                slot,
                prices: Arc::clone(&prices),
                budget,
                reply: reply_tx.clone(),
            })
            .map_err(|_| DemandError::Disconnected)?;
        }
        drop(reply_tx);

        let mut answers: Vec<Option<Bundle>> = vec![None; budgets.len()];
        for _ in 0..budgets.len() {
            let (slot, result) = reply_rx.recv().map_err(|_| DemandError::Disconnected)?;
            answers[slot] = Some(result?);
        }
        answers
            .into_iter()
            .map(|bundle| bundle.ok_or(DemandError::Disconnected))
            .collect()
    }

    /// Close the queue and join every worker.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        // Dropping the sender ends each worker's receive loop
        self.jobs.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for DemandPool {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentId;

    /// Takes every item whose price fits in the remaining budget, cheapest first.
    struct GreedySolver {
        prices: Vec<Price>,
        budget: Budget,
    }

    impl DemandSolver for GreedySolver {
        fn n_items(&self) -> usize {
            self.prices.len()
        }

        fn set_prices(&mut self, prices: &[Price]) -> Result<(), DemandError> {
            self.prices = prices.to_vec();
            Ok(())
        }

        fn set_budget(&mut self, budget: Budget) -> Result<(), DemandError> {
            self.budget = budget;
            Ok(())
        }

        fn solve(&mut self) -> Result<Bundle, DemandError> {
            let mut order: Vec<usize> = (0..self.prices.len()).collect();
            order.sort_by(|&a, &b| self.prices[a].total_cmp(&self.prices[b]));
            let mut left = self.budget;
            let mut items = vec![false; self.prices.len()];
            for j in order {
                if self.prices[j] <= left {
                    left -= self.prices[j];
                    items[j] = true;
                }
            }
            Ok(Bundle::from_items(items))
        }
    }

    #[test]
    fn answers_come_back_in_budget_order() {
        let pool = DemandPool::spawn_with(3, 3, || GreedySolver {
            prices: Vec::new(),
            budget: 0.0,
        })
        .unwrap();
        let budgets: Vec<f64> = (0..20).map(|k| k as f64 * 0.1 + 0.05).collect();
        let bundles = pool.solve_many(&[0.5, 0.3, 0.9], &budgets).unwrap();

        assert_eq!(bundles.len(), budgets.len());
        for (budget, bundle) in budgets.iter().zip(&bundles) {
            let expected_count = if *budget >= 1.7 {
                3
            } else if *budget >= 0.8 {
                2
            } else if *budget >= 0.3 {
                1
            } else {
                0
            };
            assert_eq!(bundle.count(), expected_count, "budget {budget}");
        }
        pool.shutdown();
    }

    #[test]
    fn milp_pool_solves_a_batch() {
        let agent = Agent::new(AgentId(0), vec![10.0, 1.0]);
        let pool = DemandPool::spawn(&agent, 2).unwrap();
        assert_eq!(pool.workers(), 2);

        let bundles = pool.solve_many(&[0.6, 0.6], &[0.5, 1.0, 1.3]).unwrap();
        assert_eq!(bundles[0], Bundle::empty(2));
        assert_eq!(bundles[1], Bundle::with_items(2, &[0]));
        assert_eq!(bundles[2], Bundle::with_items(2, &[0, 1]));
    }

    #[test]
    fn rejects_negative_budgets_before_dispatch() {
        let agent = Agent::new(AgentId(0), vec![1.0]);
        let pool = DemandPool::spawn(&agent, 1).unwrap();
        assert_eq!(
            pool.solve_many(&[1.0], &[0.5, -0.1]),
            Err(DemandError::NegativeBudget(-0.1))
        );
    }

    #[test]
    fn rejects_wrong_price_length() {
        let agent = Agent::new(AgentId(0), vec![1.0, 1.0]);
        let pool = DemandPool::spawn(&agent, 1).unwrap();
        assert!(matches!(
            pool.solve_many(&[1.0], &[0.5]),
            Err(DemandError::PriceLength { .. })
        ));
    }
}
