use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::error::{BackendError, SimResult, SimulationError};
use crate::numerics::Convergence;
use crate::numerics::backend::{LinearBackend, make_backend};
use crate::numerics::sparse::{BlockLayout, BlockMatrix};
use crate::numerics::timing::{record_assembly, record_linear_solve, record_rebuild};
use crate::physics::system::EquationSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverKind {
    /// One linear solve per step with coefficients taken at the old state.
    Linear,
    #[default]
    Newton,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolveStats {
    pub iterations: usize,
    /// Norm of the residual before the last update.
    pub residual_norm: f64,
}

/// Assembles the equation system into a block matrix and drives the
/// rebuild, assemble, solve, update and convergence phases of a step.
pub struct Solver {
    kind: SolverKind,
    max_iterations: usize,
    damping: f64,
    convergence: Convergence,
    backend: Box<dyn LinearBackend>,
    restricted: Option<Vec<usize>>,
    layout: BlockLayout,
    matrix: BlockMatrix,
}

impl Solver {
    pub fn new(kind: SolverKind, backend: Box<dyn LinearBackend>) -> Self {
        Self {
            kind,
            max_iterations: 100,
            damping: 1.0,
            convergence: Convergence::default(),
            backend,
            restricted: None,
            layout: BlockLayout::default(),
            matrix: BlockMatrix::new(0),
        }
    }

    pub fn linear(backend: Box<dyn LinearBackend>) -> Self {
        Self::new(SolverKind::Linear, backend)
    }

    pub fn newton(backend: Box<dyn LinearBackend>) -> Self {
        Self::new(SolverKind::Newton, backend)
    }

    pub fn from_config(config: &SolverConfig) -> SimResult<Self> {
        config.validate()?;
        let backend = make_backend(config.backend, config.linear_tolerance, config.linear_max_iterations);
        Ok(Self::new(config.kind, backend)
            .with_max_iterations(config.max_iterations)
            .with_damping(config.damping)?
            .with_convergence(config.convergence()))
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    /// Fraction of the Newton update applied per iteration, in (0, 1].
    pub fn with_damping(mut self, damping: f64) -> SimResult<Self> {
        if !(damping > 0.0 && damping <= 1.0) {
            return Err(SimulationError::config("solver", format!("damping {damping} outside (0, 1]")));
        }
        self.damping = damping;
        Ok(self)
    }

    pub fn with_convergence(mut self, convergence: Convergence) -> Self {
        self.convergence = convergence;
        self
    }

    /// Solve only for `ids`; every other unknown is held fixed.
    pub fn restricted_to(mut self, ids: Vec<usize>) -> Self {
        self.restricted = Some(ids);
        self
    }

    pub fn kind(&self) -> SolverKind {
        self.kind
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn matrix(&self) -> &BlockMatrix {
        &self.matrix
    }

    /// Advance the solved unknowns to time `t = t_old + dt`.
    ///
    /// On failure every unknown is restored to its committed value.
    pub fn solve(&mut self, sys: &mut EquationSystem, t: f64, dt: f64) -> SimResult<SolveStats> {
        sys.update_prescribed(t)?;
        let result = self.run(sys, t, dt);
        if result.is_err() {
            sys.rollback();
        }
        result
    }

    /// Solve algebraic equations at a fixed time, without a time step.
    pub fn solve_algebraic(&mut self, sys: &mut EquationSystem, t: f64) -> SimResult<SolveStats> {
        let result = self.run(sys, t, 0.0);
        if result.is_err() {
            sys.rollback();
        }
        result
    }

    fn run(&mut self, sys: &mut EquationSystem, t: f64, dt: f64) -> SimResult<SolveStats> {
        let ids = match &self.restricted {
            Some(ids) => ids.clone(),
            None => sys.unknowns().nontrivial_ids(),
        };
        if !self.layout.matches(&ids, sys.unknowns()) {
            self.layout = BlockLayout::new(&ids, sys.unknowns());
            log::trace!("block layout rebuilt: {} rows", self.layout.size());
        }
        match self.kind {
            SolverKind::Linear => self.solve_linear(sys, t, dt),
            SolverKind::Newton => self.solve_newton(sys, t, dt),
        }
    }

    fn rebuild_terms(&self, sys: &mut EquationSystem, t: f64, dt: f64) -> SimResult<()> {
        record_rebuild(|| sys.rebuild_equations(self.layout.ids(), t, dt))
    }

    fn solve_linear(&mut self, sys: &mut EquationSystem, t: f64, dt: f64) -> SimResult<SolveStats> {
        self.rebuild_terms(sys, t, dt)?;
        let rhs = record_assembly(|| self.build_matrix(sys));
        let a = self.matrix.to_csr();
        let x = record_linear_solve(|| self.backend.solve(&a, &rhs)).map_err(|e| self.solve_error(sys, e))?;
        let residual_norm = (&a * &x - &rhs).norm();
        self.layout.scatter(&x, sys.unknowns_mut());
        Ok(SolveStats {
            iterations: 1,
            residual_norm,
        })
    }

    fn solve_newton(&mut self, sys: &mut EquationSystem, t: f64, dt: f64) -> SimResult<SolveStats> {
        let mut worst = (String::new(), f64::INFINITY);
        for iteration in 1..=self.max_iterations {
            self.rebuild_terms(sys, t, dt)?;
            let residual = record_assembly(|| {
                let residual = self.build_vector(sys);
                self.build_jacobian(sys);
                residual
            });
            let residual_norm = residual.norm();
            if !residual_norm.is_finite() {
                return Err(SimulationError::domain(
                    self.layout_names(sys),
                    format!("residual is not finite at Newton iteration {iteration}"),
                ));
            }
            let jac = self.matrix.to_csr();
            let dx = record_linear_solve(|| self.backend.solve(&jac, &(-&residual)))
                .map_err(|e| self.solve_error(sys, e))?;

            let mut x = self.layout.gather(sys.unknowns());
            x.axpy(self.damping, &dx, 1.0);
            self.layout.scatter(&x, sys.unknowns_mut());

            let mut converged = true;
            worst = (String::new(), 0.0);
            for &id in self.layout.ids() {
                let range = self.layout.range(id).unwrap_or(0..0);
                let name = sys.unknowns().name(id);
                let (ok, norm) = self.convergence.check(name, &dx.as_slice()[range], sys.unknowns().values(id));
                converged &= ok;
                if !ok && norm >= worst.1 {
                    worst = (name.to_string(), norm);
                }
            }
            log::debug!(
                "t = {t:.4e} newton {iteration:>3} | |F| = {residual_norm:.3e} | |dx| = {:.3e}",
                self.convergence.norm(dx.as_slice())
            );
            if converged {
                return Ok(SolveStats {
                    iterations: iteration,
                    residual_norm,
                });
            }
        }
        Err(SimulationError::NonConvergence {
            iterations: self.max_iterations,
            unknown: worst.0,
            update_norm: worst.1,
        })
    }

    /// Assemble `A` into the block matrix and return `b`. Terms acting on
    /// unknowns outside the layout are evaluated and moved to `b`.
    pub fn build_matrix(&mut self, sys: &EquationSystem) -> DVector<f64> {
        let n = self.layout.size();
        self.matrix.reset(n);
        let mut rhs = DVector::zeros(n);
        for &target in self.layout.ids() {
            let Some(equation) = sys.equation(target) else { continue };
            let rows = self.layout.range(target).unwrap_or(0..0);
            for (source, op) in equation.operators() {
                let b = &mut rhs.as_mut_slice()[rows.clone()];
                match self.layout.offset(source) {
                    Some(col) => {
                        let ncols = sys.unknowns().get(source).size();
                        let mut block = self.matrix.block(rows.start, col, rows.len(), ncols);
                        op.set_matrix_elements(&mut block, b);
                        self.matrix.mark_block(target, source);
                    }
                    None => {
                        let mut fixed = vec![0.0; rows.len()];
                        op.set_vector_elements(&mut fixed, sys.unknowns().values(source));
                        for (bi, fi) in b.iter_mut().zip(fixed) {
                            *bi -= fi;
                        }
                    }
                }
            }
        }
        rhs
    }

    /// Residual `F(x) = sum of T(x)` over every solved equation, at the
    /// current unknown values.
    pub fn build_vector(&self, sys: &EquationSystem) -> DVector<f64> {
        let mut f = DVector::zeros(self.layout.size());
        for &target in self.layout.ids() {
            let Some(equation) = sys.equation(target) else { continue };
            let rows = self.layout.range(target).unwrap_or(0..0);
            for (source, op) in equation.operators() {
                op.set_vector_elements(&mut f.as_mut_slice()[rows.clone()], sys.unknowns().values(source));
            }
        }
        f
    }

    /// Assemble `dF/dx` into the block matrix, recording every block that
    /// received a contribution.
    pub fn build_jacobian(&mut self, sys: &EquationSystem) {
        self.matrix.reset(self.layout.size());
        for &target in self.layout.ids() {
            let Some(equation) = sys.equation(target) else { continue };
            let rows = self.layout.range(target).unwrap_or(0..0);
            for (source, op) in equation.operators() {
                let x = sys.unknowns().values(source);
                for &deriv in self.layout.ids() {
                    let cols = self.layout.range(deriv).unwrap_or(0..0);
                    let mut block = self.matrix.block(rows.start, cols.start, rows.len(), cols.len());
                    if op.set_jacobian_block(source, deriv, &mut block, x) {
                        self.matrix.mark_block(target, deriv);
                    }
                }
            }
        }
    }

    fn layout_names(&self, sys: &EquationSystem) -> String {
        self.layout
            .ids()
            .iter()
            .map(|&id| sys.unknowns().name(id))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn solve_error(&self, sys: &EquationSystem, source: BackendError) -> SimulationError {
        log::debug!("{} backend failed: {source}", self.backend.name());
        SimulationError::Solve {
            unknown: self.layout_names(sys),
            source,
        }
    }
}
