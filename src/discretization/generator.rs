use std::f64::consts::PI;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::discretization::mesh::{MomentumGrid, RadialGrid};
use crate::error::{SimResult, SimulationError};
use crate::numerics::quadrature::{Quadrature, QuadratureBackend};

pub type ProfileFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Cell edges as a function of time.
pub type EdgesFn = Arc<dyn Fn(f64) -> Vec<f64> + Send + Sync>;

/// Spatial part of the volume Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RadialJacobian {
    #[default]
    Slab,
    Cylindrical,
}

impl RadialJacobian {
    pub fn eval(&self, r: f64) -> f64 {
        match self {
            RadialJacobian::Slab => 1.0,
            RadialJacobian::Cylindrical => 2.0 * PI * r,
        }
    }
}

/// Momentum-space part of the volume Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MomentumJacobian {
    Cartesian,
    /// Spherical coordinates in (p, xi) with the azimuth integrated out.
    PXi,
}

impl MomentumJacobian {
    pub fn eval(&self, p1: f64, _p2: f64) -> f64 {
        match self {
            MomentumJacobian::Cartesian => 1.0,
            MomentumJacobian::PXi => 2.0 * PI * p1 * p1,
        }
    }
}

#[derive(Clone)]
enum RadialSpacing {
    Uniform { nr: usize, r0: f64, a: f64 },
    Custom { r_f: Vec<f64> },
    /// Cell edges equidistribute `density` over `[r0, a]`.
    Stretched { nr: usize, r0: f64, a: f64, density: ProfileFn },
    /// Uniform grid whose outer radius follows `a(t)`.
    Dynamic { nr: usize, r0: f64, a: ProfileFn },
    /// Arbitrary edges at every time, possibly with a varying cell count.
    Evolving { r_f: EdgesFn },
}

#[derive(Clone)]
pub struct RadialGridGenerator {
    spacing: RadialSpacing,
    jacobian: RadialJacobian,
}

impl RadialGridGenerator {
    pub fn uniform(nr: usize, r0: f64, a: f64) -> Self {
        Self {
            spacing: RadialSpacing::Uniform { nr, r0, a },
            jacobian: RadialJacobian::Slab,
        }
    }

    pub fn custom(r_f: Vec<f64>) -> Self {
        Self {
            spacing: RadialSpacing::Custom { r_f },
            jacobian: RadialJacobian::Slab,
        }
    }

    pub fn stretched(nr: usize, r0: f64, a: f64, density: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            spacing: RadialSpacing::Stretched {
                nr,
                r0,
                a,
                density: Arc::new(density),
            },
            jacobian: RadialJacobian::Slab,
        }
    }

    pub fn dynamic(nr: usize, r0: f64, a: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            spacing: RadialSpacing::Dynamic { nr, r0, a: Arc::new(a) },
            jacobian: RadialJacobian::Slab,
        }
    }

    pub fn evolving(r_f: impl Fn(f64) -> Vec<f64> + Send + Sync + 'static) -> Self {
        Self {
            spacing: RadialSpacing::Evolving { r_f: Arc::new(r_f) },
            jacobian: RadialJacobian::Slab,
        }
    }

    pub fn with_jacobian(mut self, jacobian: RadialJacobian) -> Self {
        self.jacobian = jacobian;
        self
    }

    pub fn needs_rebuild(&self, _t: f64) -> bool {
        matches!(self.spacing, RadialSpacing::Dynamic { .. } | RadialSpacing::Evolving { .. })
    }

    pub fn generate(&self, t: f64) -> SimResult<RadialGrid> {
        let r_f = match &self.spacing {
            RadialSpacing::Uniform { nr, r0, a } => uniform_edges(*nr, *r0, *a)?,
            RadialSpacing::Custom { r_f } => r_f.clone(),
            RadialSpacing::Stretched { nr, r0, a, density } => stretched_edges(*nr, *r0, *a, density.as_ref())?,
            RadialSpacing::Dynamic { nr, r0, a } => uniform_edges(*nr, *r0, a(t))?,
            RadialSpacing::Evolving { r_f } => r_f(t),
        };
        RadialGrid::from_edges(r_f, self.jacobian)
    }
}

fn uniform_edges(n: usize, lo: f64, hi: f64) -> SimResult<Vec<f64>> {
    if n == 0 {
        return Err(SimulationError::config("grid generator", "number of cells must be positive"));
    }
    if !(hi > lo) {
        return Err(SimulationError::config(
            "grid generator",
            format!("upper bound {hi} must exceed lower bound {lo}"),
        ));
    }
    let h = (hi - lo) / n as f64;
    let mut edges: Vec<f64> = (0..=n).map(|k| lo + k as f64 * h).collect();
    edges[n] = hi;
    Ok(edges)
}

fn stretched_edges(nr: usize, r0: f64, a: f64, density: &(dyn Fn(f64) -> f64 + Send + Sync)) -> SimResult<Vec<f64>> {
    let mut edges = uniform_edges(nr, r0, a)?;
    let quad = Quadrature::default();
    let total = quad.integrate(&|r| density(r), r0, a)?;
    if !(total > 0.0) {
        return Err(SimulationError::config(
            "grid generator",
            "grid density must have a positive integral",
        ));
    }
    let mut lower = r0;
    for (k, edge) in edges.iter_mut().enumerate().take(nr).skip(1) {
        let target = total * k as f64 / nr as f64;
        let root = quad.find_root(&|r| quad.integrate(&|s| density(s), r0, r).unwrap_or(f64::NAN) - target, lower, a)?;
        *edge = root;
        lower = root;
    }
    Ok(edges)
}

/// Cell layout along one momentum coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AxisSpacing {
    Uniform { n: usize },
    /// Two uniform pieces meeting at `split`, with `n_lo` cells below it
    /// and `n_hi` above.
    BiUniform { split: f64, n_lo: usize, n_hi: usize },
}

impl AxisSpacing {
    pub fn n_cells(&self) -> usize {
        match *self {
            AxisSpacing::Uniform { n } => n,
            AxisSpacing::BiUniform { n_lo, n_hi, .. } => n_lo + n_hi,
        }
    }

    pub fn edges(&self, lo: f64, hi: f64) -> SimResult<Vec<f64>> {
        match *self {
            AxisSpacing::Uniform { n } => uniform_edges(n, lo, hi),
            AxisSpacing::BiUniform { split, n_lo, n_hi } => {
                if !(split > lo && split < hi) {
                    return Err(SimulationError::config(
                        "grid generator",
                        format!("split point {split} must lie strictly inside ({lo}, {hi})"),
                    ));
                }
                let mut edges = uniform_edges(n_lo, lo, split)?;
                edges.pop();
                edges.extend(uniform_edges(n_hi, split, hi)?);
                Ok(edges)
            }
        }
    }
}

/// Closed set of momentum-grid shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum MomentumGridGenerator {
    /// Single trivial cell, used by fluid and scalar quantities.
    Fluid,
    /// Uniform grid in momentum magnitude and pitch cosine xi in [-1, 1].
    PXi { np: usize, nxi: usize, pmin: f64, pmax: f64 },
    /// p-xi grid with either axis optionally refined on one side of a split.
    PXiSplit {
        p: AxisSpacing,
        xi: AxisSpacing,
        pmin: f64,
        pmax: f64,
    },
    Custom {
        p1_f: Vec<f64>,
        p2_f: Vec<f64>,
        jacobian: MomentumJacobian,
    },
}

impl MomentumGridGenerator {
    pub fn generate(&self, _ir: usize, _r: f64) -> SimResult<MomentumGrid> {
        match self {
            MomentumGridGenerator::Fluid => Ok(MomentumGrid::trivial()),
            MomentumGridGenerator::PXi { np, nxi, pmin, pmax } => {
                pxi_grid(AxisSpacing::Uniform { n: *np }, AxisSpacing::Uniform { n: *nxi }, *pmin, *pmax)
            }
            MomentumGridGenerator::PXiSplit { p, xi, pmin, pmax } => pxi_grid(*p, *xi, *pmin, *pmax),
            MomentumGridGenerator::Custom { p1_f, p2_f, jacobian } => {
                MomentumGrid::from_edges(p1_f.clone(), p2_f.clone(), *jacobian)
            }
        }
    }

    pub fn is_kinetic(&self) -> bool {
        !matches!(self, MomentumGridGenerator::Fluid)
    }
}

fn pxi_grid(p: AxisSpacing, xi: AxisSpacing, pmin: f64, pmax: f64) -> SimResult<MomentumGrid> {
    if pmin < 0.0 {
        return Err(SimulationError::config("momentum grid", "pmin must be non-negative"));
    }
    let p_f = p.edges(pmin, pmax)?;
    let xi_f = xi.edges(-1.0, 1.0)?;
    MomentumGrid::from_edges(p_f, xi_f, MomentumJacobian::PXi)
}
