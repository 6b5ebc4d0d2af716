//! Finite-volume advection and diffusion on the staggered flux grids.
//!
//! For a face between a lower cell `L` and an upper cell `R` the flux is
//! `Phi = cL * x[L] + cR * x[R]` and the term contributes
//! `+Vp_f * Phi / (Vp_L * h_L)` to cell `L` and `-Vp_f * Phi / (Vp_R * h_R)`
//! to cell `R`, so the volume-weighted sum over all cells only changes
//! through boundary faces. Boundary faces use a ghost value supplied by the
//! [`BoundaryCondition`] on that side; reflecting boundaries carry no flux.

use crate::discretization::mesh::{Grid, PhasePoint};
use crate::discretization::{GridKind, GridSet};
use crate::error::{SimResult, SimulationError};
use crate::numerics::sparse::BlockView;
use crate::physics::bc::{BoundaryCondition, BoundarySet, Direction, Side};
use crate::physics::coefficient::{Coefficient, CoefficientCache, SamplePoint};
use crate::physics::unknowns::UnknownQuantityHandler;
use crate::physics::{EquationTerm, RebuildContext, TermBinding};

/// Face value used for advective fluxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvectionInterpolation {
    #[default]
    Upwind,
    Central,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxKind {
    Advection(AdvectionInterpolation),
    Diffusion,
}

/// Geometry of one flux point. Cell indices are local to a single shard.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Face {
    lower: Option<usize>,
    upper: Option<usize>,
    /// `Vp_f / (Vp * h)` of the lower and upper cell.
    w_lower: f64,
    w_upper: f64,
    /// Inverse distance between the centres on either side (ghost included).
    inv_spacing: f64,
}

struct FluxComponent {
    direction: Direction,
    kind: FluxKind,
    coefficient: Coefficient,
    state_id: Option<usize>,
    faces: Vec<Face>,
    points: Vec<SamplePoint>,
    cache: CoefficientCache,
    sides: Vec<Option<Side>>,
    /// Ghost coefficients `(a, b)` per face; `None` for interior and reflecting faces.
    ghosts: Vec<Option<(f64, f64)>>,
}

impl FluxComponent {
    /// Split the face flux into `(cL, cR)` for a coefficient value `c`.
    fn stencil(&self, c: f64, inv_spacing: f64) -> (f64, f64) {
        match self.kind {
            FluxKind::Diffusion => (c * inv_spacing, -c * inv_spacing),
            FluxKind::Advection(AdvectionInterpolation::Central) => (0.5 * c, 0.5 * c),
            FluxKind::Advection(AdvectionInterpolation::Upwind) => {
                if c > 0.0 {
                    (c, 0.0)
                } else if c < 0.0 {
                    (0.0, c)
                } else {
                    (0.0, 0.0)
                }
            }
        }
    }

    /// `dPhi/dc` at fixed values on either side of the face.
    fn flux_per_coefficient(&self, c: f64, x_lower: f64, x_upper: f64, inv_spacing: f64) -> f64 {
        match self.kind {
            FluxKind::Diffusion => (x_lower - x_upper) * inv_spacing,
            FluxKind::Advection(AdvectionInterpolation::Upwind) if c > 0.0 => x_lower,
            FluxKind::Advection(AdvectionInterpolation::Upwind) if c < 0.0 => x_upper,
            FluxKind::Advection(_) => 0.5 * (x_lower + x_upper),
        }
    }
}

/// Advection and diffusion along any combination of the radial and the two
/// momentum directions. Defaults to reflecting boundaries everywhere.
pub struct AdvectionDiffusionTerm {
    name: String,
    components: Vec<FluxComponent>,
    boundaries: BoundarySet,
    grid: GridKind,
    multiplicity: usize,
    cells: usize,
    generation: Option<u64>,
}

impl AdvectionDiffusionTerm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            boundaries: BoundarySet::default(),
            grid: GridKind::Fluid,
            multiplicity: 1,
            cells: 0,
            generation: None,
        }
    }

    pub fn with_advection(self, direction: Direction, velocity: Coefficient) -> Self {
        self.with_component(direction, FluxKind::Advection(AdvectionInterpolation::Upwind), velocity)
    }

    /// Advection using a centred face value.
    pub fn with_central_advection(self, direction: Direction, velocity: Coefficient) -> Self {
        self.with_component(direction, FluxKind::Advection(AdvectionInterpolation::Central), velocity)
    }

    pub fn with_diffusion(self, direction: Direction, coefficient: Coefficient) -> Self {
        self.with_component(direction, FluxKind::Diffusion, coefficient)
    }

    fn with_component(mut self, direction: Direction, kind: FluxKind, coefficient: Coefficient) -> Self {
        self.components.push(FluxComponent {
            direction,
            kind,
            coefficient,
            state_id: None,
            faces: Vec::new(),
            points: Vec::new(),
            cache: CoefficientCache::default(),
            sides: Vec::new(),
            ghosts: Vec::new(),
        });
        self
    }

    pub fn with_boundary(mut self, direction: Direction, side: Side, bc: BoundaryCondition) -> Self {
        self.boundaries.set(direction, side, bc);
        self
    }

    fn rows(&self) -> usize {
        self.cells * self.multiplicity
    }

    /// Apply `f(row, col, value)` for every matrix entry and `g(row, value)`
    /// for every constant (ghost) contribution to `T`.
    fn for_each_entry(&self, mut f: impl FnMut(usize, usize, f64), mut g: impl FnMut(usize, f64)) {
        for shard in 0..self.multiplicity {
            let off = shard * self.cells;
            for comp in &self.components {
                for (k, face) in comp.faces.iter().enumerate() {
                    let (cl, cr) = comp.stencil(comp.cache.values[k], face.inv_spacing);
                    match (face.lower, face.upper) {
                        (Some(l), Some(u)) => {
                            let (l, u) = (off + l, off + u);
                            f(l, l, face.w_lower * cl);
                            f(l, u, face.w_lower * cr);
                            f(u, l, -face.w_upper * cl);
                            f(u, u, -face.w_upper * cr);
                        }
                        (Some(l), None) => {
                            if let Some((a, b)) = comp.ghosts[k] {
                                let l = off + l;
                                f(l, l, face.w_lower * (cl + cr * a));
                                g(l, face.w_lower * cr * b);
                            }
                        }
                        (None, Some(u)) => {
                            if let Some((a, b)) = comp.ghosts[k] {
                                let u = off + u;
                                f(u, u, -face.w_upper * (cl * a + cr));
                                g(u, -face.w_upper * cl * b);
                            }
                        }
                        (None, None) => {}
                    }
                }
            }
        }
    }
}

fn face_geometry(grid: &Grid, direction: Direction) -> (Vec<Face>, Vec<SamplePoint>, Vec<Option<Side>>) {
    let mut faces = Vec::new();
    let mut points = Vec::new();
    let mut sides = Vec::new();
    let nr = grid.nr();
    let radial = grid.radial();
    let side_of = |k: usize, n: usize| {
        if k == 0 {
            Some(Side::Lower)
        } else if k == n {
            Some(Side::Upper)
        } else {
            None
        }
    };

    match direction {
        Direction::Radial => {
            for k in 0..=nr {
                let lo = k.saturating_sub(1);
                let hi = k.min(nr - 1);
                let w = if lo == hi {
                    0.0
                } else {
                    (radial.r_f[k] - radial.r[lo]) / (radial.r[hi] - radial.r[lo])
                };
                let mg = grid.momentum(hi);
                let vp_f = grid.vp_fr(k);
                for j in 0..mg.n2() {
                    for i in 0..mg.n1() {
                        let m = j * mg.n1() + i;
                        let lower = (k > 0).then(|| grid.offset(k - 1) + m);
                        let upper = (k < nr).then(|| grid.offset(k) + m);
                        let inv_spacing = match (k > 0, k < nr) {
                            (true, true) => 1.0 / radial.dr_f[k - 1],
                            (true, false) => 1.0 / radial.dr[k - 1],
                            _ => 1.0 / radial.dr[k],
                        };
                        faces.push(Face {
                            lower,
                            upper,
                            w_lower: if k > 0 { vp_f[m] / (grid.vp(k - 1)[m] * radial.dr[k - 1]) } else { 0.0 },
                            w_upper: if k < nr { vp_f[m] / (grid.vp(k)[m] * radial.dr[k]) } else { 0.0 },
                            inv_spacing,
                        });
                        points.push(SamplePoint {
                            at: PhasePoint {
                                ir: hi,
                                r: radial.r_f[k],
                                p1: mg.p1[i],
                                p2: mg.p2[j],
                            },
                            lo,
                            hi,
                            w,
                        });
                        sides.push(side_of(k, nr));
                    }
                }
            }
        }
        Direction::P1 | Direction::P2 => {
            for ir in 0..nr {
                let mg = grid.momentum(ir);
                let (n1, n2) = (mg.n1(), mg.n2());
                let vp = grid.vp(ir);
                let along_p1 = direction == Direction::P1;
                let (vp_f, n_along, n_across) = if along_p1 {
                    (grid.vp_f1(ir), n1, n2)
                } else {
                    (grid.vp_f2(ir), n2, n1)
                };
                let (h, h_f) = if along_p1 { (&mg.dp1, &mg.dp1_f) } else { (&mg.dp2, &mg.dp2_f) };
                for across in 0..n_across {
                    for k in 0..=n_along {
                        // Cell index of position `m` along this line, and the flux-grid index of face `k`.
                        let cell = |m: usize| if along_p1 { across * n1 + m } else { m * n1 + across };
                        let f_idx = if along_p1 { across * (n1 + 1) + k } else { k * n1 + across };
                        let (p1, p2) = if along_p1 {
                            (mg.p1_f[k], mg.p2[across])
                        } else {
                            (mg.p1[across], mg.p2_f[k])
                        };
                        let lower = (k > 0).then(|| cell(k - 1));
                        let upper = (k < n_along).then(|| cell(k));
                        let inv_spacing = match (k > 0, k < n_along) {
                            (true, true) => 1.0 / h_f[k - 1],
                            (true, false) => 1.0 / h[k - 1],
                            _ => 1.0 / h[k],
                        };
                        faces.push(Face {
                            lower: lower.map(|c| grid.offset(ir) + c),
                            upper: upper.map(|c| grid.offset(ir) + c),
                            w_lower: lower.map_or(0.0, |c| vp_f[f_idx] / (vp[c] * h[k - 1])),
                            w_upper: upper.map_or(0.0, |c| vp_f[f_idx] / (vp[c] * h[k])),
                            inv_spacing,
                        });
                        points.push(SamplePoint::cell(PhasePoint {
                            ir,
                            r: grid.radial().r[ir],
                            p1,
                            p2,
                        }));
                        sides.push(side_of(k, n_along));
                    }
                }
            }
        }
    }
    (faces, points, sides)
}

impl EquationTerm for AdvectionDiffusionTerm {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, binding: TermBinding, unknowns: &UnknownQuantityHandler) -> SimResult<()> {
        if binding.target != binding.source
            && unknowns.get(binding.target).size() != unknowns.get(binding.source).size()
        {
            return Err(SimulationError::config(
                &self.name,
                "transport couples unknowns of different sizes",
            ));
        }
        let q = unknowns.get(binding.source);
        self.grid = q.grid();
        self.multiplicity = q.multiplicity();
        for comp in &mut self.components {
            comp.state_id = comp.coefficient.resolve(unknowns)?;
        }
        Ok(())
    }

    fn grid_rebuilt(&mut self, grids: &GridSet) -> SimResult<bool> {
        let grid = grids.grid(self.grid)?;
        if self.generation == Some(grid.generation()) {
            return Ok(false);
        }
        let radial = self.components.iter().any(|c| c.direction == Direction::Radial);
        if radial && !grid.has_uniform_momentum() {
            return Err(SimulationError::config(
                &self.name,
                "radial transport needs the same momentum grid at every radius",
            ));
        }
        self.cells = grid.n_cells();
        for comp in &mut self.components {
            let (faces, points, sides) = face_geometry(grid, comp.direction);
            comp.cache.resize(faces.len());
            comp.ghosts = vec![None; faces.len()];
            comp.faces = faces;
            comp.points = points;
            comp.sides = sides;
            if comp.coefficient.is_geometric() {
                comp.cache.sample(&comp.coefficient, &comp.points, 0.0, None)?;
            }
        }
        self.generation = Some(grid.generation());
        log::trace!("'{}' recomputed flux geometry for grid '{}'", self.name, grid.name());
        Ok(true)
    }

    fn rebuild(&mut self, ctx: &RebuildContext) -> SimResult<()> {
        for comp in &mut self.components {
            if !comp.coefficient.is_geometric() {
                let state = comp.state_id.map(|id| ctx.unknowns.values(id));
                comp.cache.sample(&comp.coefficient, &comp.points, ctx.t, state)?;
            }
            for (k, side) in comp.sides.iter().enumerate() {
                let Some(side) = *side else { continue };
                let face = &comp.faces[k];
                comp.ghosts[k] = self
                    .boundaries
                    .get(comp.direction, side)
                    .ghost(ctx.t, &comp.points[k].at, 1.0 / face.inv_spacing)?;
            }
        }
        Ok(())
    }

    fn shape(&self) -> (usize, usize) {
        (self.rows(), self.rows())
    }

    fn nnz_per_row(&self) -> usize {
        1 + 2 * self.components.len()
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) {
        let mut constants = Vec::new();
        self.for_each_entry(|i, j, v| mat.add(i, j, v), |i, v| constants.push((i, v)));
        for (i, v) in constants {
            rhs[i] -= v;
        }
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) {
        let mut constants = Vec::new();
        self.for_each_entry(|i, j, v| vec[i] += v * x[j], |i, v| constants.push((i, v)));
        for (i, v) in constants {
            vec[i] += v;
        }
    }

    fn set_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, x: &[f64]) -> bool {
        let mut added = false;
        if uqty_id == deriv_id {
            self.for_each_entry(|i, j, v| jac.add(i, j, v), |_, _| {});
            added = true;
        }
        for comp in &self.components {
            if comp.state_id != Some(deriv_id) {
                continue;
            }
            let n_state = jac.ncols();
            for shard in 0..self.multiplicity {
                let off = shard * self.cells;
                for (k, face) in comp.faces.iter().enumerate() {
                    let ghost = |cell: usize| comp.ghosts[k].map(|(a, b)| a * x[off + cell] + b);
                    let (row_w, xl, xu) = match (face.lower, face.upper) {
                        (Some(l), Some(u)) => ((Some((l, face.w_lower)), Some((u, face.w_upper))), x[off + l], x[off + u]),
                        (Some(l), None) => match ghost(l) {
                            Some(g) => ((Some((l, face.w_lower)), None), x[off + l], g),
                            None => continue,
                        },
                        (None, Some(u)) => match ghost(u) {
                            Some(g) => ((None, Some((u, face.w_upper))), g, x[off + u]),
                            None => continue,
                        },
                        (None, None) => continue,
                    };
                    let c = comp.cache.values[k];
                    let d = comp.flux_per_coefficient(c, xl, xu, face.inv_spacing) * comp.cache.derivs[k];
                    if d == 0.0 {
                        continue;
                    }
                    for (col, w) in comp.points[k].stencil(n_state) {
                        if w == 0.0 {
                            continue;
                        }
                        if let Some((l, wl)) = row_w.0 {
                            jac.add(off + l, col, wl * d * w);
                        }
                        if let Some((u, wu)) = row_w.1 {
                            jac.add(off + u, col, -wu * d * w);
                        }
                    }
                }
            }
            added = true;
        }
        added
    }

    fn weights(&self) -> Vec<f64> {
        let mut out = Vec::new();
        for comp in &self.components {
            out.extend(comp.faces.iter().flat_map(|f| [f.w_lower, f.w_upper, f.inv_spacing]));
            out.extend_from_slice(&comp.cache.values);
        }
        out
    }
}
