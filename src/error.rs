use thiserror::Error;

/// Failures reported by a linear solve backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("matrix is singular")]
    Singular,
    #[error("solution contains non-finite values")]
    NonFinite,
    #[error("iterative solve did not converge after {iterations} iterations (residual {residual:.3e})")]
    NotConverged { iterations: usize, residual: f64 },
    #[error("dimension mismatch: matrix is {rows}x{cols}, right-hand side has {rhs} entries")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("configuration error in {module}: {message}")]
    Config { module: String, message: String },

    #[error("domain error in {term}: {message}")]
    Domain { term: String, message: String },

    #[error("linear solve failed for {unknown}: {source}")]
    Solve {
        unknown: String,
        #[source]
        source: BackendError,
    },

    #[error("Newton iteration did not converge after {iterations} iterations (worst unknown '{unknown}', |dx| = {update_norm:.3e})")]
    NonConvergence {
        iterations: usize,
        unknown: String,
        update_norm: f64,
    },

    #[error("time step failed at t = {t:.6e} (dt = {dt:.3e}) after {attempts} attempts: {source}")]
    StepFailed {
        t: f64,
        dt: f64,
        attempts: usize,
        #[source]
        source: Box<SimulationError>,
    },

    #[error("time step at t = {t:.6e} rejected: error estimate is {error:.3e} times the tolerance at the minimum dt = {dt:.3e}")]
    StepRejected { t: f64, dt: f64, error: f64 },
}

pub type SimResult<T> = Result<T, SimulationError>;

impl SimulationError {
    pub fn config(module: impl Into<String>, message: impl Into<String>) -> Self {
        SimulationError::Config {
            module: module.into(),
            message: message.into(),
        }
    }

    pub fn domain(term: impl Into<String>, message: impl Into<String>) -> Self {
        SimulationError::Domain {
            term: term.into(),
            message: message.into(),
        }
    }

    /// Whether a smaller time step may succeed where this one failed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SimulationError::Domain { .. }
                | SimulationError::Solve { .. }
                | SimulationError::NonConvergence { .. }
        )
    }

    /// Prefix the responsible module, term or unknown onto the error.
    pub fn with_context(self, name: &str) -> Self {
        match self {
            SimulationError::Config { module, message } => SimulationError::Config {
                module: format!("{name}/{module}"),
                message,
            },
            SimulationError::Domain { term, message } => SimulationError::Domain {
                term: format!("{name}/{term}"),
                message,
            },
            SimulationError::Solve { unknown, source } if unknown.is_empty() => {
                SimulationError::Solve {
                    unknown: name.to_string(),
                    source,
                }
            }
            other => other,
        }
    }
}
