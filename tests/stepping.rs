use kfvm_rs::discretization::generator::RadialGridGenerator;
use kfvm_rs::discretization::{GridKind, GridSet};
use kfvm_rs::error::{SimResult, SimulationError};
use kfvm_rs::numerics::backend::DirectLu;
use kfvm_rs::numerics::interp::TimeTable;
use kfvm_rs::numerics::solver::Solver;
use kfvm_rs::numerics::sparse::BlockView;
use kfvm_rs::numerics::transient::{AdaptiveControl, StepControl, TimeStepper};
use kfvm_rs::numerics::{Convergence, Tolerance};
use kfvm_rs::physics::coefficient::Coefficient;
use kfvm_rs::physics::diagonal::{DiagonalTerm, SourceTerm};
use kfvm_rs::physics::operator::Operator;
use kfvm_rs::physics::system::{EquationSystem, InitialCondition};
use kfvm_rs::physics::transient::TransientTerm;
use kfvm_rs::physics::unknowns::UnknownQuantityHandler;
use kfvm_rs::physics::{EquationTerm, RebuildContext, TermBinding};

/// Contributes nothing, but refuses time steps longer than `limit`.
struct StepLimit {
    limit: f64,
    size: usize,
}

impl EquationTerm for StepLimit {
    fn name(&self) -> &str {
        "step limit"
    }

    fn bind(&mut self, binding: TermBinding, unknowns: &UnknownQuantityHandler) -> SimResult<()> {
        self.size = unknowns.get(binding.source).size();
        Ok(())
    }

    fn grid_rebuilt(&mut self, _grids: &GridSet) -> SimResult<bool> {
        Ok(false)
    }

    fn rebuild(&mut self, ctx: &RebuildContext) -> SimResult<()> {
        if ctx.dt > self.limit {
            return Err(SimulationError::domain("step limit", format!("dt = {} is too long", ctx.dt)));
        }
        Ok(())
    }

    fn shape(&self) -> (usize, usize) {
        (self.size, self.size)
    }

    fn nnz_per_row(&self) -> usize {
        0
    }

    fn set_matrix_elements(&self, _mat: &mut BlockView<'_>, _rhs: &mut [f64]) {}

    fn set_vector_elements(&self, _vec: &mut [f64], _x: &[f64]) {}

    fn set_jacobian_block(&self, _uqty_id: usize, _deriv_id: usize, _jac: &mut BlockView<'_>, _x: &[f64]) -> bool {
        false
    }

    fn is_well_posed(&self) -> bool {
        false
    }
}

/// dx/dt = rate, starting from x = 1.
fn growth(rate: f64, limit: f64) -> EquationSystem {
    growth_on(RadialGridGenerator::uniform(2, 0.0, 1.0), rate, limit)
}

fn growth_on(radial: RadialGridGenerator, rate: f64, limit: f64) -> EquationSystem {
    let mut sys = EquationSystem::new(GridSet::new(radial, 0.0).unwrap());
    sys.add_unknown("x", GridKind::Fluid, true).unwrap();
    sys.set_operator(
        "x",
        "x",
        Operator::new()
            .with(TransientTerm::new())
            .with(SourceTerm::new("rate", Coefficient::Constant(rate)))
            .with(StepLimit { limit, size: 0 }),
    )
    .unwrap();
    sys.set_initial("x", InitialCondition::Constant(1.0)).unwrap();
    sys.initialize(0.0).unwrap();
    sys
}

#[test]
fn constant_steps_reach_final_time() {
    let mut sys = growth(2.0, f64::INFINITY);
    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 1.0, 0.25).unwrap();

    let mut seen = Vec::new();
    let stats = stepper.run(&mut sys, &mut solver, |t, _| seen.push(t)).unwrap();

    assert_eq!(stats.steps, 4);
    assert_eq!(stats.retries, 0);
    assert_eq!(seen, vec![0.25, 0.5, 0.75, 1.0]);
    assert_eq!(stats.t_final, 1.0);
    assert_eq!(sys.unknowns().times(), &[0.0, 0.25, 0.5, 0.75, 1.0]);
    for v in sys.unknowns().values(0) {
        assert!((v - 3.0).abs() < 1e-12);
    }
}

#[test]
fn failed_steps_are_halved_and_retried() {
    let mut sys = growth(1.0, 0.3);
    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 0.5, 0.5).unwrap().with_max_retries(3);

    let stats = stepper.run(&mut sys, &mut solver, |_, _| {}).unwrap();

    // 0.5 fails, 0.25 is accepted, then the remaining 0.25.
    assert_eq!(stats.steps, 2);
    assert_eq!(stats.retries, 1);
    assert!((stats.t_final - 0.5).abs() < 1e-15);
    for v in sys.unknowns().values(0) {
        assert!((v - 1.5).abs() < 1e-12);
    }
}

#[test]
fn exhausted_retries_report_the_failing_step() {
    let mut sys = growth(1.0, 0.1);
    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 1.0, 1.0).unwrap().with_max_retries(2);

    let err = stepper.run(&mut sys, &mut solver, |_, _| {}).unwrap_err();
    match &err {
        SimulationError::StepFailed { t, dt, attempts, source } => {
            assert_eq!(*t, 0.0);
            assert_eq!(*dt, 0.25);
            assert_eq!(*attempts, 3);
            assert!(matches!(**source, SimulationError::Domain { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_recoverable());
    // Nothing was committed.
    assert_eq!(sys.unknowns().values(0), &[1.0, 1.0]);
    assert_eq!(sys.unknowns().times(), &[0.0]);
}

#[test]
fn failed_solve_restores_committed_values() {
    let mut sys = growth(1.0, 0.1);
    let mut solver = Solver::linear(Box::new(DirectLu));
    assert!(solver.solve(&mut sys, 0.5, 0.5).is_err());
    assert_eq!(sys.unknowns().values(0), &[1.0, 1.0]);
}

#[test]
fn prescribed_driver_is_evaluated_at_the_end_of_each_step() {
    // dx/dt = E(t) with E = t, so implicit Euler accumulates E at t_new.
    let mut sys = EquationSystem::new(GridSet::new(RadialGridGenerator::uniform(1, 0.0, 1.0), 0.0).unwrap());
    sys.add_unknown("E", GridKind::Fluid, false).unwrap();
    sys.add_unknown("x", GridKind::Fluid, true).unwrap();
    sys.set_prescribed("E", TimeTable::time_series(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap())
        .unwrap();
    sys.set_operator("x", "x", Operator::new().with(TransientTerm::new())).unwrap();
    sys.set_operator(
        "x",
        "E",
        Operator::new().with(kfvm_rs::physics::diagonal::DiagonalTerm::identity(-1.0)),
    )
    .unwrap();
    sys.initialize(0.0).unwrap();

    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 1.0, 0.5).unwrap();
    stepper.run(&mut sys, &mut solver, |_, _| {}).unwrap();

    // 0.5 * 0.5 + 0.5 * 1.0
    assert!((sys.unknowns().values(1)[0] - 0.75).abs() < 1e-14);
    assert_eq!(sys.unknowns().values(0), &[1.0]);
}

#[test]
fn save_every_thins_the_history() {
    let grids = GridSet::new(RadialGridGenerator::uniform(2, 0.0, 1.0), 0.0).unwrap();
    let mut sys = EquationSystem::new(grids).with_save_every(2);
    sys.add_unknown("x", GridKind::Fluid, true).unwrap();
    sys.set_operator(
        "x",
        "x",
        Operator::new()
            .with(TransientTerm::new())
            .with(SourceTerm::new("rate", Coefficient::Constant(1.0))),
    )
    .unwrap();
    sys.initialize(0.0).unwrap();

    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 1.0, 0.25).unwrap();
    stepper.run(&mut sys, &mut solver, |_, _| {}).unwrap();

    assert_eq!(sys.unknowns().saved_times(), &[0.0, 0.5, 1.0]);
    assert_eq!(sys.unknowns().get(0).history().len(), 3);
}

#[test]
fn failed_step_leaves_a_moving_grid_at_its_committed_geometry() {
    let mut sys = growth_on(RadialGridGenerator::dynamic(2, 0.0, |t| 1.0 + t), 1.0, 0.1);
    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 1.0, 1.0).unwrap().with_max_retries(2);

    let err = stepper.run(&mut sys, &mut solver, |_, _| {}).unwrap_err();
    assert!(matches!(err, SimulationError::StepFailed { .. }));
    let fluid = sys.grids().grid(GridKind::Fluid).unwrap();
    assert_eq!(fluid.generation(), 0);
    assert_eq!(fluid.radial().r_f, vec![0.0, 0.5, 1.0]);
    assert_eq!(fluid.radial().r, vec![0.25, 0.75]);
}

#[test]
fn retried_step_rebuilds_the_grid_for_the_shorter_step() {
    let mut sys = growth_on(RadialGridGenerator::dynamic(2, 0.0, |t| 1.0 + t), 1.0, 0.3);
    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 0.5, 0.5).unwrap().with_max_retries(1);

    let mut outer = Vec::new();
    stepper
        .run(&mut sys, &mut solver, |_, sys| {
            outer.push(sys.grids().grid(GridKind::Fluid).unwrap().radial().r_f[2]);
        })
        .unwrap();
    assert_eq!(outer, vec![1.25, 1.5]);
}

/// dx/dt = -x, starting from x = 1.
fn decay() -> EquationSystem {
    let mut sys = EquationSystem::new(GridSet::new(RadialGridGenerator::uniform(1, 0.0, 1.0), 0.0).unwrap());
    sys.add_unknown("x", GridKind::Fluid, true).unwrap();
    sys.set_operator(
        "x",
        "x",
        Operator::new().with(TransientTerm::new()).with(DiagonalTerm::identity(1.0)),
    )
    .unwrap();
    sys.set_initial("x", InitialCondition::Constant(1.0)).unwrap();
    sys.initialize(0.0).unwrap();
    sys
}

fn adaptive(abs_tol: f64, check_every: usize) -> StepControl {
    StepControl::Adaptive(AdaptiveControl {
        tolerance: Convergence {
            tolerance: Tolerance::Absolute(abs_tol),
            ..Default::default()
        },
        check_every,
        ..Default::default()
    })
}

#[test]
fn adaptive_steps_lengthen_as_the_solution_settles() {
    let mut sys = decay();
    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 5.0, 0.01).unwrap().with_control(adaptive(1e-4, 0));

    let mut times = vec![0.0];
    let stats = stepper.run(&mut sys, &mut solver, |t, _| times.push(t)).unwrap();

    assert!((stats.t_final - 5.0).abs() < 1e-12);
    assert_eq!(stats.retries, 0);
    let steps: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(steps.iter().all(|&dt| dt > 0.0));
    assert!(steps[steps.len() - 2] > 5.0 * steps[0], "{steps:?}");
    let x = sys.unknowns().values(0)[0];
    assert!((x - (-5.0f64).exp()).abs() < 5e-3, "{x}");
}

#[test]
fn oversized_first_step_is_rejected_and_shortened() {
    let mut sys = decay();
    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 1.0, 1.0).unwrap().with_control(adaptive(1e-4, 0));

    let mut times = Vec::new();
    let stats = stepper.run(&mut sys, &mut solver, |t, _| times.push(t)).unwrap();

    assert!(stats.rejected > 0);
    assert!(times[0] < 1.0);
    // Only accepted steps are committed.
    assert_eq!(sys.unknowns().times().len(), stats.steps + 1);
    assert_eq!(&sys.unknowns().times()[1..], &times[..]);
}

#[test]
fn unchecked_steps_keep_the_last_estimated_length() {
    let mut sys = decay();
    let mut solver = Solver::linear(Box::new(DirectLu));
    let stepper = TimeStepper::new(0.0, 1.0, 0.01).unwrap().with_control(adaptive(1e-4, 1000));

    let mut times = vec![0.0];
    stepper.run(&mut sys, &mut solver, |t, _| times.push(t)).unwrap();

    let steps: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(steps[1] > steps[0]);
    // Every unchecked step but the clipped last one has the same length.
    for dt in &steps[1..steps.len() - 1] {
        assert!((dt - steps[1]).abs() < 1e-12, "{steps:?}");
    }
}

#[test]
fn adaptive_stepper_gives_up_at_the_minimum_step() {
    let mut sys = decay();
    let mut solver = Solver::linear(Box::new(DirectLu));
    let control = StepControl::Adaptive(AdaptiveControl {
        tolerance: Convergence {
            tolerance: Tolerance::Absolute(1e-14),
            ..Default::default()
        },
        dt_min: 0.05,
        ..Default::default()
    });
    let stepper = TimeStepper::new(0.0, 1.0, 0.1).unwrap().with_control(control);

    let err = stepper.run(&mut sys, &mut solver, |_, _| {}).unwrap_err();
    match err {
        SimulationError::StepRejected { t, dt, error } => {
            assert_eq!(t, 0.0);
            assert_eq!(dt, 0.05);
            assert!(error > 1.0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sys.unknowns().values(0), &[1.0]);
    assert_eq!(sys.unknowns().times(), &[0.0]);
}
