// Run configuration for the tâtonnement loop

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// === DEFAULTS ===

pub const DEFAULT_DELTA: f64 = 0.01;
pub const DEFAULT_EPSILON: f64 = 0.1;
pub const DEFAULT_T: f64 = 2.0;
pub const DEFAULT_TOL: f64 = 1.0;
pub const DEFAULT_MAX_ITER: usize = 1000;
pub const DEFAULT_FULL_RESCREEN_PERIOD: usize = 10;
pub const DEFAULT_DEMAND_WORKERS: usize = 4;

/// Numerical tolerances. None of these are tied to an item scale; tune them
/// together with `delta` when prices live far from unity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Prices below this count as free for EF-TB superbundles.
    pub free_price: f64,
    /// Slack when testing `price · bundle <= budget`.
    pub affordability: f64,
    /// Strict-dominance margin for EF-TB utility comparisons.
    pub utility: f64,
    /// Right-endpoint slack of the budget grid.
    pub grid: f64,
    /// Selector values above this count as chosen.
    pub selection: f64,
    /// Absolute slack on the pinned Phase-1 objective in Phase 2.
    pub objective_pin: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            free_price: 1e-6,
            affordability: 1e-9,
            utility: 1e-12,
            grid: 1e-9,
            selection: 0.5,
            objective_pin: 1e-7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AceeiConfig {
    /// Price step and budget grid resolution.
    pub delta: f64,
    /// Half-width of each agent's budget window.
    pub epsilon: f64,
    /// Reserved tuning parameter, carried but not read by the loop.
    pub t: f64,
    /// Clearing-error stopping threshold.
    pub tol: f64,
    pub max_iter: usize,
    /// Force a full EF-TB screen every N iterations (1 = always).
    pub full_rescreen_period: usize,
    /// Worker threads per agent demand pool.
    pub demand_workers: usize,
    pub tolerances: Tolerances,
}

impl Default for AceeiConfig {
    fn default() -> Self {
        Self {
            delta: DEFAULT_DELTA,
            epsilon: DEFAULT_EPSILON,
            t: DEFAULT_T,
            tol: DEFAULT_TOL,
            max_iter: DEFAULT_MAX_ITER,
            full_rescreen_period: DEFAULT_FULL_RESCREEN_PERIOD,
            demand_workers: DEFAULT_DEMAND_WORKERS,
            tolerances: Tolerances::default(),
        }
    }
}

impl AceeiConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AceeiConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_full_rescreen_period(mut self, period: usize) -> Self {
        self.full_rescreen_period = period;
        self
    }

    pub fn with_demand_workers(mut self, workers: usize) -> Self {
        self.demand_workers = workers;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(ConfigError::NonPositiveDelta(self.delta));
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(ConfigError::NegativeEpsilon(self.epsilon));
        }
        if !(self.tol.is_finite() && self.tol >= 0.0) {
            return Err(ConfigError::InvalidTolerance(self.tol));
        }
        if self.full_rescreen_period == 0 {
            return Err(ConfigError::ZeroRescreenPeriod);
        }
        if self.demand_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    /// Whether iteration `iteration` rebuilds the EF-TB set from scratch.
    pub fn is_full_rescreen(&self, iteration: usize) -> bool {
        iteration % self.full_rescreen_period.max(1) == 0
    }
}
