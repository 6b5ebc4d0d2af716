use std::sync::Arc;

use kryst::context::ksp_context::Workspace;
use kryst::matrix::op::CsrOp;
use kryst::parallel::{NoComm, UniverseComm};
use kryst::preconditioner::PcSide;
use kryst::solver::LinearSolver;
use kryst::solver::bicgstab::BiCgStabSolver;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use nalgebra_sparse::convert::serial::convert_csr_dense;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Largest system the automatic backend hands to the dense LU.
pub const DENSE_LIMIT: usize = 400;

/// Solves `A x = b` for an assembled sparse system.
pub trait LinearBackend {
    fn name(&self) -> &str;

    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Dense LU up to [`DENSE_LIMIT`] rows, BiCGStab above.
    #[default]
    Auto,
    DirectLu,
    BiCgStab,
}

fn check_dimensions(a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<(), BackendError> {
    if a.nrows() != a.ncols() || a.nrows() != b.len() {
        return Err(BackendError::DimensionMismatch {
            rows: a.nrows(),
            cols: a.ncols(),
            rhs: b.len(),
        });
    }
    Ok(())
}

fn finite(x: DVector<f64>) -> Result<DVector<f64>, BackendError> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(BackendError::NonFinite)
    }
}

/// Dense LU factorisation of the assembled matrix. Only sensible for small
/// systems, the dense copy grows with the square of the row count.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLu;

impl LinearBackend for DirectLu {
    fn name(&self) -> &str {
        "direct LU"
    }

    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, BackendError> {
        check_dimensions(a, b)?;
        let x = convert_csr_dense(a).lu().solve(b).ok_or(BackendError::Singular)?;
        finite(x)
    }
}

/// kryst's BiCGStab on the Jacobi row-scaled system.
#[derive(Debug, Clone, Copy)]
pub struct BiCgStab {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for BiCgStab {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 2000,
        }
    }
}

/// Inverse diagonal of `a`, with 1 where the diagonal is missing or zero.
fn jacobi_scaling(a: &CsrMatrix<f64>) -> Vec<f64> {
    (0..a.nrows())
        .map(|row| {
            let diag = a.get_entry(row, row).map(|e| e.into_value()).unwrap_or(0.0);
            if diag.abs() < 1e-300 { 1.0 } else { 1.0 / diag }
        })
        .collect()
}

impl LinearBackend for BiCgStab {
    fn name(&self) -> &str {
        "BiCGStab"
    }

    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, BackendError> {
        check_dimensions(a, b)?;
        let n = b.len();
        if b.iter().all(|&v| v == 0.0) {
            return Ok(DVector::zeros(n));
        }

        let d_inv = jacobi_scaling(a);
        let offsets = a.row_offsets();
        let mut data = a.values().to_vec();
        for row in 0..n {
            for v in &mut data[offsets[row]..offsets[row + 1]] {
                *v *= d_inv[row];
            }
        }
        let scaled = kryst::matrix::sparse::CsrMatrix::from_csr(n, n, offsets.to_vec(), a.col_indices().to_vec(), data);
        let op = CsrOp::new(Arc::new(scaled));
        let rhs: Vec<f64> = b.iter().zip(&d_inv).map(|(v, d)| v * d).collect();

        let mut solver = BiCgStabSolver::new(self.tolerance, self.max_iterations);
        let mut workspace = Workspace::new(n);
        solver.setup_workspace(&mut workspace);
        let mut x = DVector::zeros(n);
        let result = solver.solve(
            &op,
            None,
            &rhs,
            x.as_mut_slice(),
            PcSide::Left,
            &UniverseComm::NoComm(NoComm {}),
            None,
            Some(&mut workspace),
        );

        match result {
            Ok(stats) => {
                log::trace!("BiCGStab on {n} rows: {stats:?}");
                finite(x)
            }
            Err(e) => {
                let residual = (b - a * &x).norm() / b.norm();
                log::debug!("BiCGStab on {n} rows failed: {e:?}");
                Err(BackendError::NotConverged {
                    iterations: self.max_iterations,
                    residual,
                })
            }
        }
    }
}

/// Picks the dense LU for small systems and BiCGStab for everything else.
#[derive(Debug, Clone, Copy)]
pub struct AutoBackend {
    pub dense_limit: usize,
    pub krylov: BiCgStab,
}

impl Default for AutoBackend {
    fn default() -> Self {
        Self {
            dense_limit: DENSE_LIMIT,
            krylov: BiCgStab::default(),
        }
    }
}

impl AutoBackend {
    /// The backend used for a system with `rows` rows.
    pub fn select(&self, rows: usize) -> &dyn LinearBackend {
        if rows <= self.dense_limit { &DirectLu } else { &self.krylov }
    }
}

impl LinearBackend for AutoBackend {
    fn name(&self) -> &str {
        "auto"
    }

    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, BackendError> {
        self.select(a.nrows()).solve(a, b)
    }
}

pub fn make_backend(kind: BackendKind, tolerance: f64, max_iterations: usize) -> Box<dyn LinearBackend> {
    let krylov = BiCgStab {
        tolerance,
        max_iterations,
    };
    match kind {
        BackendKind::Auto => Box::new(AutoBackend {
            dense_limit: DENSE_LIMIT,
            krylov,
        }),
        BackendKind::DirectLu => Box::new(DirectLu),
        BackendKind::BiCgStab => Box::new(krylov),
    }
}
