pub mod advection_diffusion;
pub mod bc;
pub mod coefficient;
pub mod diagonal;
pub mod moment;
pub mod operator;
pub mod system;
pub mod transient;
pub mod unknowns;

use crate::discretization::GridSet;
use crate::error::SimResult;
use crate::numerics::sparse::BlockView;
use crate::physics::unknowns::UnknownQuantityHandler;

/// State visible to terms during a rebuild pass. Unknown values are
/// read-only until the solver's update phase.
pub struct RebuildContext<'a> {
    /// Time at the end of the step being taken.
    pub t: f64,
    pub dt: f64,
    pub unknowns: &'a UnknownQuantityHandler,
    pub grids: &'a GridSet,
}

/// The (target, source) pair an operator places its terms on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermBinding {
    pub target: usize,
    pub source: usize,
}

/// A single contribution `T(x)` to the residual of one unknown, where `x`
/// is the source unknown. Linear terms are written `T(x) = A x - b`.
pub trait EquationTerm {
    fn name(&self) -> &str;

    /// Resolve unknown names and learn the shapes of target and source.
    fn bind(&mut self, binding: TermBinding, unknowns: &UnknownQuantityHandler) -> SimResult<()>;

    /// Reallocate and recompute geometry-dependent weights if the grid has
    /// changed since they were last computed. Returns whether anything
    /// was recomputed.
    fn grid_rebuilt(&mut self, grids: &GridSet) -> SimResult<bool>;

    /// Recompute time- and state-dependent weights.
    fn rebuild(&mut self, ctx: &RebuildContext) -> SimResult<()>;

    /// (rows, columns) of the block this term writes to.
    fn shape(&self) -> (usize, usize);

    fn nnz_per_row(&self) -> usize;

    /// Add `A` to `mat` and `b` to `rhs`. `mat` is zero-initialised by the
    /// caller before the assembly pass; terms only ever add to it.
    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]);

    /// Add `T(x)` to `vec`.
    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]);

    /// Add `dT/d(deriv_id)` to `jac`, where `x` holds the values of unknown
    /// `uqty_id` that this term acts on. Returns whether anything was added.
    fn set_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, x: &[f64]) -> bool;

    /// Whether the term can, on its own, give its unknown a regular row.
    fn is_well_posed(&self) -> bool {
        true
    }

    fn is_transient(&self) -> bool {
        false
    }

    /// Copy of every cached weight, for inspection.
    fn weights(&self) -> Vec<f64> {
        Vec::new()
    }
}
