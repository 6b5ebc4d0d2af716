use std::sync::Arc;

use crate::discretization::mesh::PhasePoint;
use crate::error::{SimResult, SimulationError};

/// Grid direction a flux acts along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Radial,
    P1,
    P2,
}

impl Direction {
    pub fn index(&self) -> usize {
        match self {
            Direction::Radial => 0,
            Direction::P1 => 1,
            Direction::P2 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Lower,
    Upper,
}

/// Boundary coefficient depending on time and boundary position.
pub type BcFn = Arc<dyn Fn(f64, &PhasePoint) -> f64 + Send + Sync>;

/// Conversion into [`BcFn`] so constants and closures can be passed alike.
pub trait IntoBcFn {
    fn into_bc_fn(self) -> BcFn;
}

fn c(val: f64) -> BcFn {
    Arc::new(move |_, _| val)
}

impl IntoBcFn for f64 {
    fn into_bc_fn(self) -> BcFn {
        c(self)
    }
}

impl<F> IntoBcFn for F
where
    F: Fn(f64, &PhasePoint) -> f64 + Send + Sync + 'static,
{
    fn into_bc_fn(self) -> BcFn {
        Arc::new(self)
    }
}

/// `alpha * u + beta * du/dn = gamma` on the boundary face, with `n` the
/// outward normal.
#[derive(Clone)]
pub struct GeneralizedBC {
    pub alpha: BcFn,
    pub beta: BcFn,
    pub gamma: BcFn,
}

impl GeneralizedBC {
    pub fn dirichlet(g: impl IntoBcFn) -> Self {
        Self {
            alpha: c(1.0),
            beta: c(0.0),
            gamma: g.into_bc_fn(),
        }
    }

    pub fn neumann(q: impl IntoBcFn) -> Self {
        Self {
            alpha: c(0.0),
            beta: c(1.0),
            gamma: q.into_bc_fn(),
        }
    }

    pub fn robin(k: impl IntoBcFn, g: impl IntoBcFn) -> Self {
        let kf = k.into_bc_fn();
        let gf = g.into_bc_fn();
        Self {
            alpha: kf.clone(),
            beta: c(1.0),
            gamma: Arc::new(move |t, p| kf(t, p) * gf(t, p)),
        }
    }
}

#[derive(Clone, Default)]
pub enum BoundaryCondition {
    /// No flux through the boundary.
    #[default]
    Reflecting,
    /// The quantity vanishes beyond the boundary; anything flowing out is lost.
    Absorbing,
    Generalized(GeneralizedBC),
}

impl BoundaryCondition {
    /// Ghost-cell value as an affine function `a * u + b` of the adjacent
    /// interior value, or `None` when the boundary carries no flux. `delta`
    /// is the distance between the interior and ghost cell centres.
    pub fn ghost(&self, t: f64, at: &PhasePoint, delta: f64) -> SimResult<Option<(f64, f64)>> {
        match self {
            BoundaryCondition::Reflecting => Ok(None),
            BoundaryCondition::Absorbing => Ok(Some((0.0, 0.0))),
            BoundaryCondition::Generalized(bc) => {
                let (alpha, beta, gamma) = ((bc.alpha)(t, at), (bc.beta)(t, at), (bc.gamma)(t, at));
                robin_ghost_coefficients(alpha, beta, gamma, delta)
                    .map(Some)
                    .ok_or_else(|| {
                        SimulationError::domain(
                            "boundary condition",
                            format!("degenerate condition alpha = {alpha}, beta = {beta} at r = {:.4e}", at.r),
                        )
                    })
            }
        }
    }
}

/// Ghost value `g = a*u + b` such that the face value `(u + g)/2` and face
/// gradient `(g - u)/delta` satisfy `alpha*u_f + beta*du/dn = gamma`.
#[inline]
pub fn robin_ghost_coefficients(alpha: f64, beta: f64, gamma: f64, delta: f64) -> Option<(f64, f64)> {
    let denom = alpha + 2.0 * beta / delta;
    if denom == 0.0 || !denom.is_finite() || !gamma.is_finite() {
        return None;
    }
    let a = -(alpha - 2.0 * beta / delta) / denom;
    let b = 2.0 * gamma / denom;
    Some((a, b))
}

/// Boundary conditions on the six faces of the phase-space box.
#[derive(Clone, Default)]
pub struct BoundarySet {
    rules: [[BoundaryCondition; 2]; 3],
}

impl BoundarySet {
    pub fn set(&mut self, direction: Direction, side: Side, bc: BoundaryCondition) {
        self.rules[direction.index()][side as usize] = bc;
    }

    pub fn get(&self, direction: Direction, side: Side) -> &BoundaryCondition {
        &self.rules[direction.index()][side as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AT: PhasePoint = PhasePoint {
        ir: 0,
        r: 1.0,
        p1: 0.0,
        p2: 0.0,
    };

    #[test]
    fn dirichlet_ghost_mirrors_about_boundary_value() {
        let (a, b) = BoundaryCondition::Generalized(GeneralizedBC::dirichlet(2.0))
            .ghost(0.0, &AT, 0.1)
            .unwrap()
            .unwrap();
        // u = 1.5 gives face value (1.5 + g)/2 = 2.
        let g = a * 1.5 + b;
        assert!((0.5 * (1.5 + g) - 2.0).abs() < 1e-14);
    }

    #[test]
    fn neumann_ghost_sets_gradient() {
        let delta = 0.25;
        let (a, b) = BoundaryCondition::Generalized(GeneralizedBC::neumann(|t: f64, _: &PhasePoint| 3.0 * t))
            .ghost(2.0, &AT, delta)
            .unwrap()
            .unwrap();
        let u = 0.7;
        assert!(((a * u + b - u) / delta - 6.0).abs() < 1e-12);
    }

    #[test]
    fn reflecting_has_no_ghost_and_defaults_everywhere() {
        let set = BoundarySet::default();
        assert!(matches!(set.get(Direction::P2, Side::Upper), BoundaryCondition::Reflecting));
        assert!(set.get(Direction::Radial, Side::Lower).ghost(0.0, &AT, 1.0).unwrap().is_none());
    }

    #[test]
    fn degenerate_robin_is_rejected() {
        assert!(robin_ghost_coefficients(0.0, 0.0, 1.0, 0.1).is_none());
    }
}
