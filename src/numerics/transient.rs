use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::TimeStepConfig;
use crate::error::{SimResult, SimulationError};
use crate::numerics::Convergence;
use crate::numerics::solver::Solver;
use crate::numerics::timing::{finalize_and_log, reset_timing};
use crate::physics::system::EquationSystem;

/// Bounds on the factor by which an error estimate may change the step.
const MIN_STEP_FACTOR: f64 = 0.2;
const MAX_STEP_FACTOR: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepperKind {
    #[default]
    Constant,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunStats {
    pub steps: usize,
    /// Steps that had to be retried with a smaller time step.
    pub retries: usize,
    /// Steps whose error estimate exceeded the tolerance.
    pub rejected: usize,
    pub newton_iterations: usize,
    pub t_final: f64,
}

/// Step-doubling error control.
///
/// A checked step is taken once with `dt` and once as two steps of `dt / 2`.
/// The difference between the two results estimates the local error of the
/// half-step result, which is the one kept.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveControl {
    pub tolerance: Convergence,
    /// Estimate the error on every n-th step only; 0 and 1 check every step.
    pub check_every: usize,
    pub safety: f64,
    pub dt_min: f64,
    pub dt_max: f64,
}

impl Default for AdaptiveControl {
    fn default() -> Self {
        Self {
            tolerance: Convergence::default(),
            check_every: 0,
            safety: 0.9,
            dt_min: 0.0,
            dt_max: f64::INFINITY,
        }
    }
}

impl AdaptiveControl {
    fn checks(&self, step: usize) -> bool {
        step % self.check_every.max(1) == 0
    }

    /// Factor for the next step after an estimate of `error` tolerances.
    /// Implicit Euler has a local error of order dt^2.
    fn step_factor(&self, error: f64) -> f64 {
        if error == 0.0 {
            return MAX_STEP_FACTOR;
        }
        (self.safety / error.sqrt()).clamp(MIN_STEP_FACTOR, MAX_STEP_FACTOR)
    }

    /// Largest ratio of error estimate to tolerance over the solved unknowns.
    fn error_ratio(&self, sys: &EquationSystem, coarse: &[(usize, Vec<f64>)]) -> f64 {
        coarse
            .iter()
            .map(|(id, coarse)| {
                let fine = sys.unknowns().values(*id);
                let diff: Vec<f64> = fine.iter().zip(coarse).map(|(f, c)| f - c).collect();
                let error = self.tolerance.norm(&diff);
                let limit = self
                    .tolerance
                    .tolerance_for(sys.unknowns().name(*id))
                    .threshold(self.tolerance.norm(fine));
                if error == 0.0 {
                    0.0
                } else if limit > 0.0 {
                    error / limit
                } else {
                    f64::INFINITY
                }
            })
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepControl {
    /// Fixed step, halved only to recover from a failed solve.
    Constant,
    Adaptive(AdaptiveControl),
}

/// An accepted step.
struct Taken {
    dt: f64,
    next_dt: f64,
    iterations: usize,
}

/// Time stepper with step halving on failure and optional step-doubling
/// error control.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeStepper {
    pub t0: f64,
    pub tmax: f64,
    /// Step length; the first step when the control is adaptive.
    pub dt: f64,
    pub max_retries: usize,
    pub control: StepControl,
}

impl TimeStepper {
    pub fn new(t0: f64, tmax: f64, dt: f64) -> SimResult<Self> {
        Self::from_config(&TimeStepConfig {
            t0,
            tmax,
            dt: Some(dt),
            nt: None,
            ..TimeStepConfig::default()
        })
    }

    pub fn from_config(config: &TimeStepConfig) -> SimResult<Self> {
        config.validate()?;
        let dt = match (config.dt, config.nt) {
            (Some(dt), None) => dt,
            (None, Some(nt)) => (config.tmax - config.t0) / nt as f64,
            _ => return Err(SimulationError::config("time stepper", "exactly one of dt and nt must be given")),
        };
        let control = match config.kind {
            StepperKind::Constant => StepControl::Constant,
            StepperKind::Adaptive => StepControl::Adaptive(AdaptiveControl {
                tolerance: config.convergence(),
                check_every: config.check_every,
                dt_min: config.dt_min.max(1e-12 * (config.tmax - config.t0)),
                dt_max: config.dt_max.unwrap_or(f64::INFINITY),
                ..AdaptiveControl::default()
            }),
        };
        Ok(Self {
            t0: config.t0,
            tmax: config.tmax,
            dt,
            max_retries: config.max_retries,
            control,
        })
    }

    pub fn with_max_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_control(mut self, control: StepControl) -> Self {
        self.control = control;
        self
    }

    /// Step from `t0` to `tmax`. `callback` sees the system after every
    /// accepted step.
    pub fn run(
        &self,
        sys: &mut EquationSystem,
        solver: &mut Solver,
        mut callback: impl FnMut(f64, &EquationSystem),
    ) -> SimResult<RunStats> {
        reset_timing();
        let start = Instant::now();
        let mut stats = RunStats {
            t_final: self.t0,
            ..Default::default()
        };
        let mut t = self.t0;
        let mut dt = self.dt;
        // Relative slack so that accumulated round-off does not add a sliver step.
        let eps = 1e-10 * self.dt.min(self.tmax - self.t0);

        while t < self.tmax - eps {
            let nominal = dt.min(self.tmax - t);
            let taken = match &self.control {
                StepControl::Adaptive(control) if control.checks(stats.steps) => {
                    self.checked_step(sys, solver, t, nominal, control, &mut stats)?
                }
                StepControl::Adaptive(_) => Taken {
                    next_dt: dt,
                    ..self.retried_step(sys, solver, t, nominal, &mut stats)?
                },
                StepControl::Constant => self.retried_step(sys, solver, t, nominal, &mut stats)?,
            };
            t += taken.dt;
            sys.commit(t);
            if !matches!(self.control, StepControl::Constant) {
                dt = taken.next_dt;
            }
            stats.steps += 1;
            stats.newton_iterations += taken.iterations;
            stats.t_final = t;
            log::info!(
                "step {:>5} | t = {t:.4e} | dt = {:.3e} | iters = {}",
                stats.steps,
                taken.dt,
                taken.iterations
            );
            callback(t, sys);
        }

        finalize_and_log(start.elapsed());
        Ok(stats)
    }

    /// One step of `dt`, halved on recoverable failures.
    fn retried_step(
        &self,
        sys: &mut EquationSystem,
        solver: &mut Solver,
        t: f64,
        mut dt: f64,
        stats: &mut RunStats,
    ) -> SimResult<Taken> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_step(sys, solver, t, dt) {
                Ok(iterations) => {
                    return Ok(Taken {
                        dt,
                        next_dt: dt,
                        iterations,
                    });
                }
                Err(e) if e.is_recoverable() && attempt <= self.max_retries => {
                    log::warn!("step at t = {t:.4e} failed with dt = {dt:.3e}: {e}; retrying with dt/2");
                    stats.retries += 1;
                    dt *= 0.5;
                }
                Err(e) => {
                    return Err(SimulationError::StepFailed {
                        t,
                        dt,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// One step of at most `dt` whose error estimate is within tolerance.
    fn checked_step(
        &self,
        sys: &mut EquationSystem,
        solver: &mut Solver,
        t: f64,
        mut dt: f64,
        control: &AdaptiveControl,
        stats: &mut RunStats,
    ) -> SimResult<Taken> {
        let start = sys.checkpoint();
        let mut attempt = 0;
        loop {
            match self.doubled_step(sys, solver, t, dt, control, &start) {
                Ok((iterations, error)) if error <= 1.0 => {
                    let next_dt = (dt * control.step_factor(error)).min(control.dt_max).max(control.dt_min);
                    log::debug!("t = {t:.4e}: error estimate {error:.3e} accepted dt = {dt:.3e}, next {next_dt:.3e}");
                    return Ok(Taken {
                        dt,
                        next_dt,
                        iterations,
                    });
                }
                Ok((_, error)) => {
                    sys.reset_to(&start);
                    stats.rejected += 1;
                    if dt <= control.dt_min {
                        return Err(SimulationError::StepRejected { t, dt, error });
                    }
                    let shorter = (dt * control.step_factor(error)).max(control.dt_min);
                    log::debug!("t = {t:.4e}: error estimate {error:.3e} rejected dt = {dt:.3e}, trying {shorter:.3e}");
                    dt = shorter;
                }
                Err(e) if e.is_recoverable() && attempt < self.max_retries => {
                    sys.reset_to(&start);
                    attempt += 1;
                    log::warn!("step at t = {t:.4e} failed with dt = {dt:.3e}: {e}; retrying with dt/2");
                    stats.retries += 1;
                    dt *= 0.5;
                }
                Err(e) => {
                    sys.reset_to(&start);
                    return Err(SimulationError::StepFailed {
                        t,
                        dt,
                        attempts: attempt + 1,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// Take `dt` as one step, then again as two half steps from `start`.
    /// Leaves the half-step result in place and returns the iteration count
    /// with the error estimate in units of the tolerance.
    fn doubled_step(
        &self,
        sys: &mut EquationSystem,
        solver: &mut Solver,
        t: f64,
        dt: f64,
        control: &AdaptiveControl,
        start: &[Vec<f64>],
    ) -> SimResult<(usize, f64)> {
        let mut iterations = self.try_step(sys, solver, t, dt)?;
        let coarse: Vec<(usize, Vec<f64>)> = sys
            .unknowns()
            .nontrivial_ids()
            .into_iter()
            .map(|id| (id, sys.unknowns().values(id).to_vec()))
            .collect();
        sys.reset_to(start);

        let half = 0.5 * dt;
        iterations += self.try_step(sys, solver, t, half)?;
        sys.advance_substep();
        iterations += self.try_step(sys, solver, t + half, half)?;
        Ok((iterations, control.error_ratio(sys, &coarse)))
    }

    fn try_step(&self, sys: &mut EquationSystem, solver: &mut Solver, t: f64, dt: f64) -> SimResult<usize> {
        let t_new = t + dt;
        let attempt = sys.rebuild_grids(t_new).and_then(|_| solver.solve(sys, t_new, dt));
        match attempt {
            Ok(stats) => Ok(stats.iterations),
            Err(e) => {
                sys.rollback();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::Tolerance;

    #[test]
    fn nt_divides_the_interval() {
        let stepper = TimeStepper::from_config(&TimeStepConfig {
            t0: 1.0,
            tmax: 2.0,
            dt: None,
            nt: Some(4),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(stepper.dt, 0.25);
        assert_eq!(stepper.control, StepControl::Constant);
    }

    #[test]
    fn dt_and_nt_together_are_rejected() {
        let err = TimeStepper::from_config(&TimeStepConfig {
            dt: Some(0.1),
            nt: Some(10),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, SimulationError::Config { .. }));
    }

    #[test]
    fn adaptive_config_builds_error_control() {
        let stepper = TimeStepper::from_config(&TimeStepConfig {
            kind: StepperKind::Adaptive,
            tmax: 2.0,
            rel_tol: 1e-4,
            dt_max: Some(0.5),
            check_every: 3,
            ..Default::default()
        })
        .unwrap();
        let StepControl::Adaptive(control) = &stepper.control else {
            panic!("expected adaptive control");
        };
        assert_eq!(control.tolerance.tolerance, Tolerance::Combined(1e-10, 1e-4));
        assert_eq!(control.dt_max, 0.5);
        assert_eq!(control.dt_min, 2e-12);
        assert!(control.checks(0) && control.checks(3) && !control.checks(4));
    }

    #[test]
    fn step_factor_grows_small_errors_and_shrinks_large_ones() {
        let control = AdaptiveControl::default();
        assert_eq!(control.step_factor(0.0), MAX_STEP_FACTOR);
        assert!((control.step_factor(0.81) - 1.0).abs() < 1e-12);
        assert!(control.step_factor(4.0) < 1.0);
        assert_eq!(control.step_factor(1e6), MIN_STEP_FACTOR);
    }
}
