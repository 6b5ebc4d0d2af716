use crate::discretization::GridSet;
use crate::error::SimResult;
use crate::numerics::sparse::BlockView;
use crate::physics::unknowns::UnknownQuantityHandler;
use crate::physics::{EquationTerm, RebuildContext, TermBinding};

/// All terms acting on one (target, source) block. Contributions of the
/// individual terms are summed.
#[derive(Default)]
pub struct Operator {
    terms: Vec<Box<dyn EquationTerm>>,
    binding: Option<TermBinding>,
}

impl Operator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_term(&mut self, term: impl EquationTerm + 'static) -> &mut Self {
        self.terms.push(Box::new(term));
        self
    }

    /// Builder form of [`Operator::add_term`].
    pub fn with(mut self, term: impl EquationTerm + 'static) -> Self {
        self.add_term(term);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> impl Iterator<Item = &dyn EquationTerm> {
        self.terms.iter().map(|t| t.as_ref())
    }

    pub fn binding(&self) -> Option<TermBinding> {
        self.binding
    }

    pub(crate) fn bind(&mut self, binding: TermBinding, unknowns: &UnknownQuantityHandler) -> SimResult<()> {
        for term in &mut self.terms {
            let name = term.name().to_string();
            term.bind(binding, unknowns).map_err(|e| e.with_context(&name))?;
        }
        self.binding = Some(binding);
        Ok(())
    }

    /// Returns whether any term recomputed its geometric weights.
    pub fn grid_rebuilt(&mut self, grids: &GridSet) -> SimResult<bool> {
        let mut any = false;
        for term in &mut self.terms {
            any |= term.grid_rebuilt(grids).map_err(|e| e.with_context(term.name()))?;
        }
        Ok(any)
    }

    pub fn rebuild(&mut self, ctx: &RebuildContext) -> SimResult<()> {
        for term in &mut self.terms {
            term.rebuild(ctx).map_err(|e| e.with_context(term.name()))?;
        }
        Ok(())
    }

    pub fn nnz_per_row(&self) -> usize {
        self.terms.iter().map(|t| t.nnz_per_row()).sum()
    }

    pub fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) {
        for term in &self.terms {
            term.set_matrix_elements(mat, rhs);
        }
    }

    pub fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) {
        for term in &self.terms {
            term.set_vector_elements(vec, x);
        }
    }

    pub fn set_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, x: &[f64]) -> bool {
        let mut added = false;
        for term in &self.terms {
            added |= term.set_jacobian_block(uqty_id, deriv_id, jac, x);
        }
        added
    }

    /// Some term gives the row a regular diagonal.
    pub fn is_well_posed(&self) -> bool {
        self.terms.iter().any(|t| t.is_well_posed())
    }

    pub fn has_transient_term(&self) -> bool {
        self.terms.iter().any(|t| t.is_transient())
    }
}
