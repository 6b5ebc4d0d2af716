use crate::discretization::GridSet;
use crate::error::{SimResult, SimulationError};
use crate::numerics::sparse::BlockView;
use crate::physics::unknowns::UnknownQuantityHandler;
use crate::physics::{EquationTerm, RebuildContext, TermBinding};

/// Implicit Euler time derivative, `T(x) = scale * (x - x_old) / dt`.
pub struct TransientTerm {
    scale: f64,
    source: Option<usize>,
    size: usize,
    inv_dt: f64,
    x_old: Vec<f64>,
}

impl TransientTerm {
    pub fn new() -> Self {
        Self::scaled(1.0)
    }

    pub fn scaled(scale: f64) -> Self {
        Self {
            scale,
            source: None,
            size: 0,
            inv_dt: 0.0,
            x_old: Vec::new(),
        }
    }
}

impl Default for TransientTerm {
    fn default() -> Self {
        Self::new()
    }
}

impl EquationTerm for TransientTerm {
    fn name(&self) -> &str {
        "transient"
    }

    fn bind(&mut self, binding: TermBinding, unknowns: &UnknownQuantityHandler) -> SimResult<()> {
        if binding.target != binding.source {
            return Err(SimulationError::config(
                "transient",
                format!(
                    "a time derivative of '{}' cannot appear in the equation for '{}'",
                    unknowns.name(binding.source),
                    unknowns.name(binding.target)
                ),
            ));
        }
        self.source = Some(binding.source);
        self.size = unknowns.get(binding.source).size();
        Ok(())
    }

    fn grid_rebuilt(&mut self, _grids: &GridSet) -> SimResult<bool> {
        Ok(false)
    }

    fn rebuild(&mut self, ctx: &RebuildContext) -> SimResult<()> {
        let id = self
            .source
            .ok_or_else(|| SimulationError::config("transient", "term rebuilt before it was bound"))?;
        if !(ctx.dt > 0.0) {
            return Err(SimulationError::domain("transient", format!("time step {} is not positive", ctx.dt)));
        }
        self.inv_dt = self.scale / ctx.dt;
        self.x_old.clear();
        self.x_old.extend_from_slice(ctx.unknowns.previous(id));
        Ok(())
    }

    fn shape(&self) -> (usize, usize) {
        (self.size, self.size)
    }

    fn nnz_per_row(&self) -> usize {
        1
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) {
        for (i, xo) in self.x_old.iter().enumerate() {
            mat.add(i, i, self.inv_dt);
            rhs[i] += self.inv_dt * xo;
        }
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) {
        for (i, xo) in self.x_old.iter().enumerate() {
            vec[i] += self.inv_dt * (x[i] - xo);
        }
    }

    fn set_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, _x: &[f64]) -> bool {
        if uqty_id != deriv_id {
            return false;
        }
        for i in 0..self.x_old.len() {
            jac.add(i, i, self.inv_dt);
        }
        true
    }

    fn is_transient(&self) -> bool {
        true
    }

    fn weights(&self) -> Vec<f64> {
        vec![self.inv_dt]
    }
}
