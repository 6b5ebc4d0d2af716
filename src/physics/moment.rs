use std::sync::Arc;

use crate::discretization::{GridKind, GridSet};
use crate::error::{SimResult, SimulationError};
use crate::numerics::sparse::BlockView;
use crate::physics::unknowns::UnknownQuantityHandler;
use crate::physics::{EquationTerm, RebuildContext, TermBinding};

pub type MomentumFn = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

#[derive(Clone)]
enum Reduction {
    /// Kinetic → fluid: `sum_k factor(p) * Vp * dp1 * dp2 / Vp_vol` at each radius.
    Momentum(MomentumFn),
    /// Any grid → scalar: volume-weighted sum over every cell.
    Volume,
}

/// Linear reduction of a quantity to a lower-dimensional one,
/// `T(x)_row = scale * sum_col w[row, col] * x[col]`.
pub struct MomentTerm {
    name: String,
    reduction: Reduction,
    scale: f64,
    source_grid: GridKind,
    rows: usize,
    cols: usize,
    /// Row `r` holds entries `row_offsets[r]..row_offsets[r+1]`.
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
    generation: Option<u64>,
}

impl MomentTerm {
    fn with(name: impl Into<String>, reduction: Reduction, scale: f64) -> Self {
        Self {
            name: name.into(),
            reduction,
            scale,
            source_grid: GridKind::Fluid,
            rows: 0,
            cols: 0,
            row_offsets: Vec::new(),
            col_indices: Vec::new(),
            values: Vec::new(),
            generation: None,
        }
    }

    /// Momentum-space moment of a distribution, weighted by `factor(p1, p2)`.
    pub fn momentum_moment(name: impl Into<String>, scale: f64, factor: impl Fn(f64, f64) -> f64 + Send + Sync + 'static) -> Self {
        Self::with(name, Reduction::Momentum(Arc::new(factor)), scale)
    }

    /// Density moment, `factor = 1`.
    pub fn density(scale: f64) -> Self {
        Self::momentum_moment("density moment", scale, |_, _| 1.0)
    }

    /// Volume integral onto a single scalar.
    pub fn volume_integral(scale: f64) -> Self {
        Self::with("volume integral", Reduction::Volume, scale)
    }
}

impl EquationTerm for MomentTerm {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, binding: TermBinding, unknowns: &UnknownQuantityHandler) -> SimResult<()> {
        let target = unknowns.get(binding.target);
        let source = unknowns.get(binding.source);
        if target.multiplicity() != 1 || source.multiplicity() != 1 {
            return Err(SimulationError::config(&self.name, "moments of multi-shard quantities are not supported"));
        }
        let expected = match self.reduction {
            Reduction::Momentum(_) => GridKind::Fluid,
            Reduction::Volume => GridKind::Scalar,
        };
        if target.grid() != expected {
            return Err(SimulationError::config(
                &self.name,
                format!("'{}' must live on the {} grid", target.name(), expected.name()),
            ));
        }
        self.source_grid = source.grid();
        Ok(())
    }

    fn grid_rebuilt(&mut self, grids: &GridSet) -> SimResult<bool> {
        let grid = grids.grid(self.source_grid)?;
        if self.generation == Some(grid.generation()) {
            return Ok(false);
        }
        self.row_offsets.clear();
        self.col_indices.clear();
        self.values.clear();
        self.cols = grid.n_cells();
        self.row_offsets.push(0);
        match &self.reduction {
            Reduction::Momentum(factor) => {
                for ir in 0..grid.nr() {
                    let mg = grid.momentum(ir);
                    let vp = grid.vp(ir);
                    let vp_vol = grid.radial().vp_vol[ir];
                    for j in 0..mg.n2() {
                        for i in 0..mg.n1() {
                            let k = j * mg.n1() + i;
                            self.col_indices.push(grid.offset(ir) + k);
                            self.values.push(
                                self.scale * factor(mg.p1[i], mg.p2[j]) * vp[k] * mg.dp1[i] * mg.dp2[j] / vp_vol,
                            );
                        }
                    }
                    self.row_offsets.push(self.col_indices.len());
                }
            }
            Reduction::Volume => {
                for ir in 0..grid.nr() {
                    let mg = grid.momentum(ir);
                    for j in 0..mg.n2() {
                        for i in 0..mg.n1() {
                            self.col_indices.push(grid.index(ir, i, j));
                            self.values.push(self.scale * grid.cell_volume(ir, i, j));
                        }
                    }
                }
                self.row_offsets.push(self.col_indices.len());
            }
        }
        self.rows = self.row_offsets.len() - 1;
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(SimulationError::config(&self.name, "moment weights are not finite"));
        }
        self.generation = Some(grid.generation());
        Ok(true)
    }

    fn rebuild(&mut self, _ctx: &RebuildContext) -> SimResult<()> {
        Ok(())
    }

    fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nnz_per_row(&self) -> usize {
        self.row_offsets.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(0)
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, _rhs: &mut [f64]) {
        for row in 0..self.rows {
            for k in self.row_offsets[row]..self.row_offsets[row + 1] {
                mat.add(row, self.col_indices[k], self.values[k]);
            }
        }
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) {
        for row in 0..self.rows {
            let range = self.row_offsets[row]..self.row_offsets[row + 1];
            vec[row] += self.col_indices[range.clone()]
                .iter()
                .zip(&self.values[range])
                .map(|(&c, &w)| w * x[c])
                .sum::<f64>();
        }
    }

    fn set_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, _x: &[f64]) -> bool {
        if uqty_id != deriv_id {
            return false;
        }
        self.set_matrix_elements(jac, &mut []);
        true
    }

    fn is_well_posed(&self) -> bool {
        false
    }

    fn weights(&self) -> Vec<f64> {
        self.values.clone()
    }
}
