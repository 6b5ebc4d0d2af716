use std::sync::Arc;

use num_dual::Dual64;

use crate::discretization::mesh::PhasePoint;
use crate::error::{SimResult, SimulationError};
use crate::numerics::interp::TimeTable;
use crate::physics::unknowns::UnknownQuantityHandler;

pub type PointFn = Arc<dyn Fn(&PhasePoint) -> f64 + Send + Sync>;
pub type StateFn = Arc<dyn Fn(Dual64, &PhasePoint) -> Dual64 + Send + Sync>;

/// A coefficient field sampled on cell or flux points.
#[derive(Clone)]
pub enum Coefficient {
    Constant(f64),
    /// Depends on position only.
    Profile(PointFn),
    /// Tabulated in time and radius.
    Prescribed(TimeTable),
    /// Function of a radial-profile (or scalar) unknown, differentiated
    /// through dual numbers.
    StateDependent { unknown: String, f: StateFn },
}

impl Coefficient {
    pub fn profile(f: impl Fn(&PhasePoint) -> f64 + Send + Sync + 'static) -> Self {
        Coefficient::Profile(Arc::new(f))
    }

    pub fn state_dependent(
        unknown: impl Into<String>,
        f: impl Fn(Dual64, &PhasePoint) -> Dual64 + Send + Sync + 'static,
    ) -> Self {
        Coefficient::StateDependent {
            unknown: unknown.into(),
            f: Arc::new(f),
        }
    }

    /// Only changes when the grid does.
    pub fn is_geometric(&self) -> bool {
        matches!(self, Coefficient::Constant(_) | Coefficient::Profile(_))
    }

    /// ID of the unknown the coefficient reads, checked to be a radial
    /// profile or a scalar.
    pub fn resolve(&self, unknowns: &UnknownQuantityHandler) -> SimResult<Option<usize>> {
        let Coefficient::StateDependent { unknown, .. } = self else {
            return Ok(None);
        };
        let id = unknowns.require(unknown)?;
        let q = unknowns.get(id);
        if q.multiplicity() != 1 || q.grid().is_kinetic() {
            return Err(SimulationError::config(
                "coefficient",
                format!("coefficients may only depend on radial profiles or scalars, not '{unknown}'"),
            ));
        }
        Ok(Some(id))
    }
}

/// Where a coefficient is sampled, and how the value of a radial profile
/// is interpolated there: `(1 - w) * y[lo] + w * y[hi]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    pub at: PhasePoint,
    pub lo: usize,
    pub hi: usize,
    pub w: f64,
}

impl SamplePoint {
    pub fn cell(at: PhasePoint) -> Self {
        Self {
            at,
            lo: at.ir,
            hi: at.ir,
            w: 0.0,
        }
    }

    /// Stencil into a state vector of length `n` (1 for scalars).
    pub fn stencil(&self, n: usize) -> [(usize, f64); 2] {
        if n == 1 {
            [(0, 1.0), (0, 0.0)]
        } else {
            [(self.lo, 1.0 - self.w), (self.hi, self.w)]
        }
    }

    fn interpolate(&self, y: &[f64]) -> f64 {
        self.stencil(y.len()).iter().map(|&(k, w)| w * y[k]).sum()
    }
}

/// Sampled values of a coefficient and, for state-dependent coefficients,
/// their derivative with respect to the interpolated state value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoefficientCache {
    pub values: Vec<f64>,
    pub derivs: Vec<f64>,
}

impl CoefficientCache {
    pub fn resize(&mut self, n: usize) {
        self.values.clear();
        self.values.resize(n, 0.0);
        self.derivs.clear();
        self.derivs.resize(n, 0.0);
    }

    /// Evaluate `coeff` on `points`. `state` is the value of the unknown a
    /// state-dependent coefficient reads.
    pub fn sample(
        &mut self,
        coeff: &Coefficient,
        points: &[SamplePoint],
        t: f64,
        state: Option<&[f64]>,
    ) -> SimResult<()> {
        if self.values.len() != points.len() {
            return Err(SimulationError::config(
                "coefficient",
                format!("cache holds {} values for {} sample points", self.values.len(), points.len()),
            ));
        }
        for (k, pt) in points.iter().enumerate() {
            let (value, deriv) = match coeff {
                Coefficient::Constant(c) => (*c, 0.0),
                Coefficient::Profile(f) => (f(&pt.at), 0.0),
                Coefficient::Prescribed(table) => (table.eval(t, pt.at.r), 0.0),
                Coefficient::StateDependent { unknown, f } => {
                    let y = state.ok_or_else(|| {
                        SimulationError::config("coefficient", format!("state of '{unknown}' was not supplied"))
                    })?;
                    let d = f(Dual64::new(pt.interpolate(y), 1.0), &pt.at);
                    (d.re, d.eps)
                }
            };
            if !value.is_finite() || !deriv.is_finite() {
                return Err(SimulationError::domain(
                    "coefficient",
                    format!("non-finite coefficient at r = {:.4e}, p = ({:.4e}, {:.4e})", pt.at.r, pt.at.p1, pt.at.p2),
                ));
            }
            self.values[k] = value;
            self.derivs[k] = deriv;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_dual::DualNum;

    fn point(ir: usize, r: f64) -> PhasePoint {
        PhasePoint { ir, r, p1: 0.0, p2: 0.0 }
    }

    #[test]
    fn state_dependent_derivative() {
        let coeff = Coefficient::state_dependent("T", |y, _| y.powf(1.5));
        let points = [SamplePoint::cell(point(0, 0.1)), SamplePoint::cell(point(1, 0.3))];
        let mut cache = CoefficientCache::default();
        cache.resize(2);
        cache.sample(&coeff, &points, 0.0, Some(&[4.0, 9.0])).unwrap();
        assert!((cache.values[0] - 8.0).abs() < 1e-12);
        assert!((cache.derivs[1] - 4.5).abs() < 1e-12);
    }

    #[test]
    fn missing_state_is_a_config_error() {
        let coeff = Coefficient::state_dependent("T", |y, _| y * 2.0);
        let points = [SamplePoint::cell(point(0, 0.1))];
        let mut cache = CoefficientCache::default();
        cache.resize(1);
        let err = cache.sample(&coeff, &points, 0.0, None).unwrap_err();
        assert!(matches!(err, SimulationError::Config { .. }));
        assert!(err.to_string().contains("'T'"), "{err}");

        let err = cache.sample(&Coefficient::Constant(1.0), &points[..0], 0.0, None).unwrap_err();
        assert!(matches!(err, SimulationError::Config { .. }));
    }

    #[test]
    fn non_finite_values_are_domain_errors() {
        let coeff = Coefficient::state_dependent("T", |y, _| y.ln());
        let points = [SamplePoint::cell(point(0, 0.1))];
        let mut cache = CoefficientCache::default();
        cache.resize(1);
        let err = cache.sample(&coeff, &points, 0.0, Some(&[-1.0])).unwrap_err();
        assert!(err.is_recoverable());
    }
}
