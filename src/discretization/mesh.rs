use crate::discretization::generator::{MomentumGridGenerator, MomentumJacobian, RadialGridGenerator, RadialJacobian};
use crate::error::{SimResult, SimulationError};

/// Radial cell grid with its staggered flux grid.
///
/// `r_f` always holds one more point than `r`; `dr_f` holds the distance
/// between neighbouring cell centres and is therefore one shorter than `r`.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialGrid {
    pub r: Vec<f64>,
    pub r_f: Vec<f64>,
    pub dr: Vec<f64>,
    pub dr_f: Vec<f64>,
    /// Spatial volume Jacobian at cell centres.
    pub vp_vol: Vec<f64>,
    /// Spatial volume Jacobian at flux points.
    pub vp_vol_f: Vec<f64>,
}

impl RadialGrid {
    pub fn from_edges(r_f: Vec<f64>, jacobian: RadialJacobian) -> SimResult<Self> {
        check_edges("radial grid", &r_f)?;
        let r: Vec<f64> = r_f.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
        let dr: Vec<f64> = r_f.windows(2).map(|w| w[1] - w[0]).collect();
        let dr_f: Vec<f64> = r.windows(2).map(|w| w[1] - w[0]).collect();
        let vp_vol = r.iter().map(|&x| jacobian.eval(x)).collect();
        let vp_vol_f = r_f.iter().map(|&x| jacobian.eval(x)).collect();
        Ok(Self {
            r,
            r_f,
            dr,
            dr_f,
            vp_vol,
            vp_vol_f,
        })
    }

    pub fn nr(&self) -> usize {
        self.r.len()
    }
}

/// Two-dimensional momentum grid attached to a single radial cell.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumGrid {
    pub p1: Vec<f64>,
    pub p1_f: Vec<f64>,
    pub p2: Vec<f64>,
    pub p2_f: Vec<f64>,
    pub dp1: Vec<f64>,
    pub dp2: Vec<f64>,
    pub dp1_f: Vec<f64>,
    pub dp2_f: Vec<f64>,
    pub jacobian: MomentumJacobian,
}

impl MomentumGrid {
    pub fn from_edges(p1_f: Vec<f64>, p2_f: Vec<f64>, jacobian: MomentumJacobian) -> SimResult<Self> {
        check_edges("momentum grid (p1)", &p1_f)?;
        check_edges("momentum grid (p2)", &p2_f)?;
        let centres = |f: &[f64]| f.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect::<Vec<_>>();
        let widths = |f: &[f64]| f.windows(2).map(|w| w[1] - w[0]).collect::<Vec<_>>();
        let p1 = centres(&p1_f);
        let p2 = centres(&p2_f);
        Ok(Self {
            dp1: widths(&p1_f),
            dp2: widths(&p2_f),
            dp1_f: widths(&p1),
            dp2_f: widths(&p2),
            p1,
            p1_f,
            p2,
            p2_f,
            jacobian,
        })
    }

    /// The single-cell grid used by fluid and scalar quantities.
    pub fn trivial() -> Self {
        Self {
            p1: vec![0.5],
            p1_f: vec![0.0, 1.0],
            p2: vec![0.5],
            p2_f: vec![0.0, 1.0],
            dp1: vec![1.0],
            dp2: vec![1.0],
            dp1_f: vec![],
            dp2_f: vec![],
            jacobian: MomentumJacobian::Cartesian,
        }
    }

    pub fn n1(&self) -> usize {
        self.p1.len()
    }

    pub fn n2(&self) -> usize {
        self.p2.len()
    }

    pub fn n_cells(&self) -> usize {
        self.n1() * self.n2()
    }

    /// Geometry of the two grids agrees, so radial fluxes are well defined.
    pub fn same_shape(&self, other: &MomentumGrid) -> bool {
        self.p1_f == other.p1_f && self.p2_f == other.p2_f && self.jacobian == other.jacobian
    }
}

fn check_edges(what: &str, edges: &[f64]) -> SimResult<()> {
    if edges.len() < 2 {
        return Err(SimulationError::config(
            what,
            format!("need at least two flux points, got {}", edges.len()),
        ));
    }
    if edges.iter().any(|x| !x.is_finite()) {
        return Err(SimulationError::config(what, "flux points must be finite"));
    }
    if edges.windows(2).any(|w| w[1] <= w[0]) {
        return Err(SimulationError::config(what, "flux points must be strictly increasing"));
    }
    Ok(())
}

/// Coordinates of a cell or flux point in phase space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhasePoint {
    pub ir: usize,
    pub r: f64,
    pub p1: f64,
    pub p2: f64,
}

/// Radial grid × per-radius momentum grids, with the phase-space volume
/// Jacobian stored in flat buffers indexed by `offset(ir) + j*n1 + i`.
#[derive(Clone)]
pub struct Grid {
    name: String,
    radial: RadialGrid,
    momentum: Vec<MomentumGrid>,
    offsets: Vec<usize>,
    offsets_f1: Vec<usize>,
    offsets_f2: Vec<usize>,
    vp: Vec<f64>,
    vp_fr: Vec<f64>,
    vp_f1: Vec<f64>,
    vp_f2: Vec<f64>,
    radial_generator: RadialGridGenerator,
    momentum_generator: MomentumGridGenerator,
    generation: u64,
    /// Highest generation ever handed out, survives `restore`.
    latest_generation: u64,
}

impl Grid {
    pub fn new(
        name: impl Into<String>,
        radial_generator: RadialGridGenerator,
        momentum_generator: MomentumGridGenerator,
        t0: f64,
    ) -> SimResult<Self> {
        let name = name.into();
        let radial = radial_generator
            .generate(t0)
            .map_err(|e| e.with_context(&name))?;
        let momentum = Self::generate_momentum(&momentum_generator, &radial).map_err(|e| e.with_context(&name))?;
        let mut grid = Self {
            name,
            radial: RadialGrid {
                r: vec![],
                r_f: vec![],
                dr: vec![],
                dr_f: vec![],
                vp_vol: vec![],
                vp_vol_f: vec![],
            },
            momentum: vec![],
            offsets: vec![],
            offsets_f1: vec![],
            offsets_f2: vec![],
            vp: vec![],
            vp_fr: vec![],
            vp_f1: vec![],
            vp_f2: vec![],
            radial_generator,
            momentum_generator,
            generation: 0,
            latest_generation: 0,
        };
        grid.install(radial, momentum);
        Ok(grid)
    }

    fn generate_momentum(generator: &MomentumGridGenerator, radial: &RadialGrid) -> SimResult<Vec<MomentumGrid>> {
        radial
            .r
            .iter()
            .enumerate()
            .map(|(ir, &r)| generator.generate(ir, r))
            .collect()
    }

    /// Regenerate the geometry for time `t`.
    ///
    /// Returns `true` only if the geometry actually changed; in that case
    /// `generation()` is advanced and every cached weight keyed on the old
    /// generation is stale.
    pub fn rebuild(&mut self, t: f64) -> SimResult<bool> {
        if !self.radial_generator.needs_rebuild(t) {
            return Ok(false);
        }
        let radial = self
            .radial_generator
            .generate(t)
            .map_err(|e| e.with_context(&self.name))?;
        if radial == self.radial {
            return Ok(false);
        }
        let momentum =
            Self::generate_momentum(&self.momentum_generator, &radial).map_err(|e| e.with_context(&self.name))?;
        self.install(radial, momentum);
        self.latest_generation += 1;
        self.generation = self.latest_generation;
        log::trace!("grid '{}' rebuilt at t = {:.4e} (generation {})", self.name, t, self.generation);
        Ok(true)
    }

    pub fn needs_rebuild(&self, t: f64) -> bool {
        self.radial_generator.needs_rebuild(t)
    }

    /// Return to the geometry of `saved`, an earlier copy of this grid.
    ///
    /// The restored geometry keeps the generation it had, and the next
    /// rebuild is numbered past every generation handed out so far, so a
    /// cache filled while the discarded geometry was live never matches.
    pub fn restore(&mut self, saved: Grid) {
        let latest = self.latest_generation.max(saved.latest_generation);
        *self = saved;
        self.latest_generation = latest;
    }

    fn install(&mut self, radial: RadialGrid, momentum: Vec<MomentumGrid>) {
        let nr = radial.nr();

        let mut offsets = Vec::with_capacity(nr + 1);
        let mut offsets_f1 = Vec::with_capacity(nr + 1);
        let mut offsets_f2 = Vec::with_capacity(nr + 1);
        let (mut n, mut n_f1, mut n_f2) = (0, 0, 0);
        for mg in &momentum {
            offsets.push(n);
            offsets_f1.push(n_f1);
            offsets_f2.push(n_f2);
            n += mg.n_cells();
            n_f1 += (mg.n1() + 1) * mg.n2();
            n_f2 += mg.n1() * (mg.n2() + 1);
        }
        offsets.push(n);
        offsets_f1.push(n_f1);
        offsets_f2.push(n_f2);

        let mut vp = Vec::with_capacity(n);
        let mut vp_f1 = Vec::with_capacity(n_f1);
        let mut vp_f2 = Vec::with_capacity(n_f2);
        for (ir, mg) in momentum.iter().enumerate() {
            let vr = radial.vp_vol[ir];
            for j in 0..mg.n2() {
                for i in 0..mg.n1() {
                    vp.push(vr * mg.jacobian.eval(mg.p1[i], mg.p2[j]));
                }
            }
            for j in 0..mg.n2() {
                for i in 0..=mg.n1() {
                    vp_f1.push(vr * mg.jacobian.eval(mg.p1_f[i], mg.p2[j]));
                }
            }
            for j in 0..=mg.n2() {
                for i in 0..mg.n1() {
                    vp_f2.push(vr * mg.jacobian.eval(mg.p1[i], mg.p2_f[j]));
                }
            }
        }

        // Radial flux points borrow the momentum grid of the adjacent cell.
        let mut vp_fr = Vec::new();
        for ir in 0..=nr {
            let mg = &momentum[ir.min(nr - 1)];
            let vr = radial.vp_vol_f[ir];
            for j in 0..mg.n2() {
                for i in 0..mg.n1() {
                    vp_fr.push(vr * mg.jacobian.eval(mg.p1[i], mg.p2[j]));
                }
            }
        }

        self.radial = radial;
        self.momentum = momentum;
        self.offsets = offsets;
        self.offsets_f1 = offsets_f1;
        self.offsets_f2 = offsets_f2;
        self.vp = vp;
        self.vp_fr = vp_fr;
        self.vp_f1 = vp_f1;
        self.vp_f2 = vp_f2;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counter advanced every time the geometry changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn radial(&self) -> &RadialGrid {
        &self.radial
    }

    pub fn momentum(&self, ir: usize) -> &MomentumGrid {
        &self.momentum[ir]
    }

    pub fn nr(&self) -> usize {
        self.radial.nr()
    }

    /// Total number of cells over all radii.
    pub fn n_cells(&self) -> usize {
        self.offsets[self.nr()]
    }

    pub fn offset(&self, ir: usize) -> usize {
        self.offsets[ir]
    }

    pub fn index(&self, ir: usize, i: usize, j: usize) -> usize {
        let mg = &self.momentum[ir];
        debug_assert!(i < mg.n1() && j < mg.n2());
        self.offsets[ir] + j * mg.n1() + i
    }

    /// Phase-space Jacobian at the cells of radius `ir`.
    pub fn vp(&self, ir: usize) -> &[f64] {
        &self.vp[self.offsets[ir]..self.offsets[ir + 1]]
    }

    /// Phase-space Jacobian on the radial flux point `ir` (0..=nr).
    pub fn vp_fr(&self, ir: usize) -> &[f64] {
        let mg = &self.momentum[ir.min(self.nr() - 1)];
        let start = self.offsets[ir];
        &self.vp_fr[start..start + mg.n_cells()]
    }

    /// Phase-space Jacobian on the p1 flux grid of radius `ir`, indexed `j*(n1+1) + i`.
    pub fn vp_f1(&self, ir: usize) -> &[f64] {
        &self.vp_f1[self.offsets_f1[ir]..self.offsets_f1[ir + 1]]
    }

    /// Phase-space Jacobian on the p2 flux grid of radius `ir`, indexed `j*n1 + i`.
    pub fn vp_f2(&self, ir: usize) -> &[f64] {
        &self.vp_f2[self.offsets_f2[ir]..self.offsets_f2[ir + 1]]
    }

    /// True when every radius carries the same momentum grid.
    pub fn has_uniform_momentum(&self) -> bool {
        self.momentum.windows(2).all(|w| w[0].same_shape(&w[1]))
    }

    /// Phase-space volume of a single cell.
    pub fn cell_volume(&self, ir: usize, i: usize, j: usize) -> f64 {
        let mg = &self.momentum[ir];
        self.vp(ir)[j * mg.n1() + i] * self.radial.dr[ir] * mg.dp1[i] * mg.dp2[j]
    }

    /// Centre of the cell with flat index `offset(ir) + j*n1 + i`.
    pub fn cell_point(&self, ir: usize, i: usize, j: usize) -> PhasePoint {
        let mg = &self.momentum[ir];
        PhasePoint {
            ir,
            r: self.radial.r[ir],
            p1: mg.p1[i],
            p2: mg.p2[j],
        }
    }

    /// Volume-weighted sum of a quantity living on this grid.
    pub fn integrate(&self, values: &[f64]) -> f64 {
        assert_eq!(values.len(), self.n_cells(), "array does not match grid '{}'", self.name);
        let mut total = 0.0;
        for ir in 0..self.nr() {
            let mg = &self.momentum[ir];
            for j in 0..mg.n2() {
                for i in 0..mg.n1() {
                    total += values[self.index(ir, i, j)] * self.cell_volume(ir, i, j);
                }
            }
        }
        total
    }

    /// Sum over a single radius, returning the momentum-space density at `ir`.
    pub fn momentum_integral(&self, ir: usize, values: &[f64], factor: impl Fn(f64, f64) -> f64) -> f64 {
        let mg = &self.momentum[ir];
        let vr = self.radial.vp_vol[ir];
        let vp = self.vp(ir);
        let mut total = 0.0;
        for j in 0..mg.n2() {
            for i in 0..mg.n1() {
                let k = j * mg.n1() + i;
                total += values[self.offsets[ir] + k] * factor(mg.p1[i], mg.p2[j]) * vp[k] * mg.dp1[i] * mg.dp2[j];
            }
        }
        total / vr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flux_grids_have_one_extra_point() {
        let grid = Grid::new(
            "hottail",
            RadialGridGenerator::uniform(4, 0.0, 1.0),
            MomentumGridGenerator::PXi {
                np: 5,
                nxi: 3,
                pmin: 0.0,
                pmax: 2.0,
            },
            0.0,
        )
        .unwrap();
        assert_eq!(grid.radial().r_f.len(), grid.nr() + 1);
        let mg = grid.momentum(0);
        assert_eq!(mg.p1_f.len(), mg.n1() + 1);
        assert_eq!(mg.p2_f.len(), mg.n2() + 1);
        assert_eq!(grid.n_cells(), 4 * 5 * 3);
        assert_eq!(grid.vp_f1(2).len(), 6 * 3);
        assert_eq!(grid.vp_f2(2).len(), 5 * 4);
        assert_eq!(grid.vp_fr(4).len(), 15);
        assert_eq!(grid.index(1, 2, 1), 15 + 5 + 2);
    }

    #[test]
    fn integrate_matches_cylinder_volume() {
        let grid = Grid::new(
            "fluid",
            RadialGridGenerator::uniform(50, 0.0, 1.0).with_jacobian(RadialJacobian::Cylindrical),
            MomentumGridGenerator::Fluid,
            0.0,
        )
        .unwrap();
        let ones = vec![1.0; grid.n_cells()];
        // Midpoint rule integrates 2*pi*r exactly.
        assert!((grid.integrate(&ones) - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn rejects_unordered_edges() {
        let err = RadialGrid::from_edges(vec![0.0, 0.5, 0.4], RadialJacobian::Slab).unwrap_err();
        assert!(matches!(err, SimulationError::Config { .. }));
    }
}
