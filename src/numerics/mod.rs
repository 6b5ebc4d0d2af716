pub mod backend;
pub mod interp;
pub mod quadrature;
pub mod solver;
pub mod sparse;
pub mod timing;
pub mod transient;

use std::collections::BTreeMap;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Tolerance {
    Absolute(f64),
    Relative(f64),
    Combined(f64, f64),
}

impl Tolerance {
    /// Largest update norm accepted for a quantity of norm `reference`.
    pub fn threshold(&self, reference: f64) -> f64 {
        match *self {
            Tolerance::Absolute(abs) => abs,
            Tolerance::Relative(rel) => rel * reference,
            Tolerance::Combined(abs, rel) => abs + rel * reference,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConvergenceMetric {
    #[default]
    L2Norm,
    MaxNorm,
}

/// Convergence test applied separately to the Newton update of each unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convergence {
    pub tolerance: Tolerance,
    pub metric: ConvergenceMetric,
    /// Overrides of `tolerance`, keyed by unknown name.
    pub per_unknown: BTreeMap<String, Tolerance>,
}

impl Default for Convergence {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::Combined(1e-12, 1e-8),
            metric: ConvergenceMetric::L2Norm,
            per_unknown: BTreeMap::new(),
        }
    }
}

impl Convergence {
    pub fn norm(&self, values: &[f64]) -> f64 {
        let v = DVector::from_column_slice(values);
        match self.metric {
            ConvergenceMetric::L2Norm => v.norm(),
            ConvergenceMetric::MaxNorm => v.amax(),
        }
    }

    pub fn tolerance_for(&self, unknown: &str) -> Tolerance {
        self.per_unknown.get(unknown).copied().unwrap_or(self.tolerance)
    }

    /// Returns `(converged, |dx|)` for one unknown.
    pub fn check(&self, unknown: &str, update: &[f64], values: &[f64]) -> (bool, f64) {
        let dx = self.norm(update);
        let limit = self.tolerance_for(unknown).threshold(self.norm(values));
        (dx <= limit, dx)
    }
}
