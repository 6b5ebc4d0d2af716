use crate::discretization::{GridKind, GridSet};
use crate::error::{SimResult, SimulationError};
use crate::numerics::sparse::BlockView;
use crate::physics::coefficient::{Coefficient, CoefficientCache, SamplePoint};
use crate::physics::unknowns::UnknownQuantityHandler;
use crate::physics::{EquationTerm, RebuildContext, TermBinding};

/// Cell-local state shared by the diagonal term family: sample points,
/// cached weights and the grid generation they were computed for.
struct CellWeights {
    coefficient: Coefficient,
    grid: GridKind,
    multiplicity: usize,
    state_id: Option<usize>,
    points: Vec<SamplePoint>,
    cache: CoefficientCache,
    generation: Option<u64>,
}

impl CellWeights {
    fn new(coefficient: Coefficient) -> Self {
        Self {
            coefficient,
            grid: GridKind::Fluid,
            multiplicity: 1,
            state_id: None,
            points: Vec::new(),
            cache: CoefficientCache::default(),
            generation: None,
        }
    }

    fn bind(&mut self, source: usize, unknowns: &UnknownQuantityHandler) -> SimResult<()> {
        let q = unknowns.get(source);
        self.grid = q.grid();
        self.multiplicity = q.multiplicity();
        self.state_id = self.coefficient.resolve(unknowns)?;
        Ok(())
    }

    fn grid_rebuilt(&mut self, grids: &GridSet) -> SimResult<bool> {
        let grid = grids.grid(self.grid)?;
        if self.generation == Some(grid.generation()) {
            return Ok(false);
        }
        self.points.clear();
        for ir in 0..grid.nr() {
            let mg = grid.momentum(ir);
            for j in 0..mg.n2() {
                for i in 0..mg.n1() {
                    self.points.push(SamplePoint::cell(grid.cell_point(ir, i, j)));
                }
            }
        }
        self.cache.resize(self.points.len());
        if self.coefficient.is_geometric() {
            self.cache.sample(&self.coefficient, &self.points, 0.0, None)?;
        }
        self.generation = Some(grid.generation());
        Ok(true)
    }

    fn rebuild(&mut self, ctx: &RebuildContext) -> SimResult<()> {
        if self.coefficient.is_geometric() {
            return Ok(());
        }
        let state = self.state_id.map(|id| ctx.unknowns.values(id));
        self.cache.sample(&self.coefficient, &self.points, ctx.t, state)
    }

    fn rows(&self) -> usize {
        self.points.len() * self.multiplicity
    }

    /// Weight of every row (shards repeat the cell weights).
    fn weight(&self, row: usize) -> f64 {
        self.cache.values[row % self.points.len()]
    }

    /// Add `scale(row) * dw/dy` to the derivative block for the state unknown.
    fn add_state_jacobian(&self, jac: &mut BlockView<'_>, scale: impl Fn(usize) -> f64) {
        let n_state = jac.ncols();
        for row in 0..self.rows() {
            let k = row % self.points.len();
            let d = self.cache.derivs[k] * scale(row);
            for (col, w) in self.points[k].stencil(n_state) {
                if w != 0.0 {
                    jac.add(row, col, d * w);
                }
            }
        }
    }
}

/// `T(x) = w * x`, one entry per cell.
pub struct DiagonalTerm {
    name: String,
    weights: CellWeights,
}

impl DiagonalTerm {
    pub fn new(name: impl Into<String>, weight: Coefficient) -> Self {
        Self {
            name: name.into(),
            weights: CellWeights::new(weight),
        }
    }

    /// `T(x) = scale * x`.
    pub fn identity(scale: f64) -> Self {
        Self::new("identity", Coefficient::Constant(scale))
    }
}

impl EquationTerm for DiagonalTerm {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, binding: TermBinding, unknowns: &UnknownQuantityHandler) -> SimResult<()> {
        if unknowns.get(binding.target).size() != unknowns.get(binding.source).size() {
            return Err(SimulationError::config(
                &self.name,
                format!(
                    "diagonal term couples '{}' and '{}' of different sizes",
                    unknowns.name(binding.target),
                    unknowns.name(binding.source)
                ),
            ));
        }
        self.weights.bind(binding.source, unknowns)
    }

    fn grid_rebuilt(&mut self, grids: &GridSet) -> SimResult<bool> {
        self.weights.grid_rebuilt(grids)
    }

    fn rebuild(&mut self, ctx: &RebuildContext) -> SimResult<()> {
        self.weights.rebuild(ctx)
    }

    fn shape(&self) -> (usize, usize) {
        (self.weights.rows(), self.weights.rows())
    }

    fn nnz_per_row(&self) -> usize {
        1
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, _rhs: &mut [f64]) {
        for row in 0..self.weights.rows() {
            mat.add(row, row, self.weights.weight(row));
        }
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) {
        for (row, v) in vec.iter_mut().enumerate().take(self.weights.rows()) {
            *v += self.weights.weight(row) * x[row];
        }
    }

    fn set_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, x: &[f64]) -> bool {
        let mut added = false;
        if deriv_id == uqty_id {
            self.set_matrix_elements(jac, &mut []);
            added = true;
        }
        if self.weights.state_id == Some(deriv_id) {
            self.weights.add_state_jacobian(jac, |row| x[row]);
            added = true;
        }
        added
    }

    fn weights(&self) -> Vec<f64> {
        self.weights.cache.values.clone()
    }
}

/// Prescribed right-hand side, `T = -s`. Carries no diagonal.
pub struct SourceTerm {
    name: String,
    weights: CellWeights,
}

impl SourceTerm {
    pub fn new(name: impl Into<String>, source: Coefficient) -> Self {
        Self {
            name: name.into(),
            weights: CellWeights::new(source),
        }
    }
}

impl EquationTerm for SourceTerm {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, binding: TermBinding, unknowns: &UnknownQuantityHandler) -> SimResult<()> {
        // Sized to the row unknown; the column unknown is not read.
        self.weights.bind(binding.target, unknowns)
    }

    fn grid_rebuilt(&mut self, grids: &GridSet) -> SimResult<bool> {
        self.weights.grid_rebuilt(grids)
    }

    fn rebuild(&mut self, ctx: &RebuildContext) -> SimResult<()> {
        self.weights.rebuild(ctx)
    }

    fn shape(&self) -> (usize, usize) {
        (self.weights.rows(), self.weights.rows())
    }

    fn nnz_per_row(&self) -> usize {
        if self.weights.state_id.is_some() { 2 } else { 0 }
    }

    fn set_matrix_elements(&self, _mat: &mut BlockView<'_>, rhs: &mut [f64]) {
        for (row, b) in rhs.iter_mut().enumerate().take(self.weights.rows()) {
            *b += self.weights.weight(row);
        }
    }

    fn set_vector_elements(&self, vec: &mut [f64], _x: &[f64]) {
        for (row, v) in vec.iter_mut().enumerate().take(self.weights.rows()) {
            *v -= self.weights.weight(row);
        }
    }

    fn set_jacobian_block(&self, _uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, _x: &[f64]) -> bool {
        if self.weights.state_id == Some(deriv_id) {
            self.weights.add_state_jacobian(jac, |_| -1.0);
            return true;
        }
        false
    }

    fn is_well_posed(&self) -> bool {
        false
    }

    fn weights(&self) -> Vec<f64> {
        self.weights.cache.values.clone()
    }
}
