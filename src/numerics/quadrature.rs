use crate::error::{SimResult, SimulationError};

/// Scalar integration and root bracketing used by terms and grid generators.
pub trait QuadratureBackend {
    fn integrate(&self, f: &dyn Fn(f64) -> f64, a: f64, b: f64) -> SimResult<f64>;

    /// Root of `f` on `[lo, hi]`, which must bracket a sign change.
    fn find_root(&self, f: &dyn Fn(f64) -> f64, lo: f64, hi: f64) -> SimResult<f64>;
}

/// Adaptive Simpson integration and bisection root finding.
#[derive(Debug, Clone)]
pub struct Quadrature {
    pub tolerance: f64,
    pub max_depth: u32,
    pub root_tolerance: f64,
    pub max_bisections: u32,
}

impl Default for Quadrature {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_depth: 40,
            root_tolerance: 1e-12,
            max_bisections: 200,
        }
    }
}

impl Quadrature {
    fn simpson(f: &dyn Fn(f64) -> f64, a: f64, fa: f64, b: f64, fb: f64) -> (f64, f64, f64) {
        let m = 0.5 * (a + b);
        let fm = f(m);
        (m, fm, (b - a) / 6.0 * (fa + 4.0 * fm + fb))
    }

    #[allow(clippy::too_many_arguments)]
    fn adapt(
        &self,
        f: &dyn Fn(f64) -> f64,
        a: f64,
        fa: f64,
        b: f64,
        fb: f64,
        whole: f64,
        m: f64,
        fm: f64,
        tol: f64,
        depth: u32,
    ) -> f64 {
        let (lm, flm, left) = Self::simpson(f, a, fa, m, fm);
        let (rm, frm, right) = Self::simpson(f, m, fm, b, fb);
        let delta = left + right - whole;
        if depth == 0 || delta.abs() <= 15.0 * tol {
            return left + right + delta / 15.0;
        }
        self.adapt(f, a, fa, m, fm, left, lm, flm, 0.5 * tol, depth - 1)
            + self.adapt(f, m, fm, b, fb, right, rm, frm, 0.5 * tol, depth - 1)
    }
}

impl QuadratureBackend for Quadrature {
    fn integrate(&self, f: &dyn Fn(f64) -> f64, a: f64, b: f64) -> SimResult<f64> {
        if a == b {
            return Ok(0.0);
        }
        let (fa, fb) = (f(a), f(b));
        let (m, fm, whole) = Self::simpson(f, a, fa, b, fb);
        let value = self.adapt(f, a, fa, b, fb, whole, m, fm, self.tolerance, self.max_depth);
        if !value.is_finite() {
            return Err(SimulationError::domain(
                "quadrature",
                format!("integral over [{a}, {b}] is not finite"),
            ));
        }
        Ok(value)
    }

    fn find_root(&self, f: &dyn Fn(f64) -> f64, lo: f64, hi: f64) -> SimResult<f64> {
        let (mut lo, mut hi) = (lo, hi);
        let mut flo = f(lo);
        let fhi = f(hi);
        if flo == 0.0 {
            return Ok(lo);
        }
        if fhi == 0.0 {
            return Ok(hi);
        }
        if !(flo.signum() != fhi.signum()) {
            return Err(SimulationError::domain(
                "root finder",
                format!("[{lo}, {hi}] does not bracket a root"),
            ));
        }
        for _ in 0..self.max_bisections {
            let mid = 0.5 * (lo + hi);
            let fmid = f(mid);
            if fmid == 0.0 || (hi - lo) < self.root_tolerance * (1.0 + mid.abs()) {
                return Ok(mid);
            }
            if fmid.signum() == flo.signum() {
                lo = mid;
                flo = fmid;
            } else {
                hi = mid;
            }
        }
        Ok(0.5 * (lo + hi))
    }
}
