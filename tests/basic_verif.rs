use std::f64::consts::PI;

use kfvm_rs::discretization::generator::{MomentumGridGenerator, RadialGridGenerator};
use kfvm_rs::discretization::{GridKind, GridSet};
use kfvm_rs::error::SimulationError;
use kfvm_rs::numerics::backend::DirectLu;
use kfvm_rs::numerics::interp::TimeTable;
use kfvm_rs::numerics::solver::Solver;
use kfvm_rs::physics::advection_diffusion::AdvectionDiffusionTerm;
use kfvm_rs::physics::bc::Direction;
use kfvm_rs::physics::coefficient::Coefficient;
use kfvm_rs::physics::diagonal::{DiagonalTerm, SourceTerm};
use kfvm_rs::physics::moment::MomentTerm;
use kfvm_rs::physics::operator::Operator;
use kfvm_rs::physics::system::{EquationSystem, InitialCondition};
use kfvm_rs::physics::transient::TransientTerm;

fn fluid_system(nr: usize) -> EquationSystem {
    EquationSystem::new(GridSet::new(RadialGridGenerator::uniform(nr, 0.0, 1.0), 0.0).unwrap())
}

fn diffusion(d: Coefficient) -> AdvectionDiffusionTerm {
    AdvectionDiffusionTerm::new("diffusion").with_diffusion(Direction::Radial, d)
}

#[test]
fn implicit_euler_step_is_exact() {
    // (x - 1)/dt = 2 with dt = 0.5 gives x = 2.
    let mut sys = fluid_system(1);
    sys.add_unknown("x", GridKind::Fluid, true).unwrap();
    sys.set_operator(
        "x",
        "x",
        Operator::new()
            .with(TransientTerm::new())
            .with(SourceTerm::new("S", Coefficient::Constant(2.0))),
    )
    .unwrap();
    sys.set_initial("x", InitialCondition::Constant(1.0)).unwrap();
    sys.initialize(0.0).unwrap();

    let mut solver = Solver::linear(Box::new(DirectLu));
    solver.solve(&mut sys, 0.5, 0.5).unwrap();
    assert_eq!(sys.unknowns().values(0), &[2.0]);
}

#[test]
fn three_cell_diffusion_conserves_mass_and_flattens() {
    let mut sys = fluid_system(3);
    let x = sys.add_unknown("x", GridKind::Fluid, true).unwrap();
    sys.set_operator(
        "x",
        "x",
        Operator::new()
            .with(TransientTerm::new())
            .with(diffusion(Coefficient::Constant(1.0))),
    )
    .unwrap();
    sys.set_initial("x", InitialCondition::Values(vec![1.0, 0.0, 0.0])).unwrap();
    sys.initialize(0.0).unwrap();

    let grid = sys.grids().grid(GridKind::Fluid).unwrap();
    let mass0 = grid.integrate(sys.unknowns().values(x));

    let mut solver = Solver::linear(Box::new(DirectLu));
    solver.solve(&mut sys, 1000.0, 1000.0).unwrap();

    let values = sys.unknowns().values(x);
    let mass1 = sys.grids().grid(GridKind::Fluid).unwrap().integrate(values);
    assert!((mass1 - mass0).abs() < 1e-10, "mass changed from {mass0} to {mass1}");
    assert!(values[0] > values[1] && values[1] > values[2]);
    for v in values {
        assert!((v - 1.0 / 3.0).abs() < 1e-3, "{values:?} not close to the mean");
    }
}

#[test]
fn nonlinear_diffusion_converges_and_conserves_mass() {
    let mut sys = fluid_system(8);
    let t = sys.add_unknown("T", GridKind::Fluid, true).unwrap();
    sys.set_operator(
        "T",
        "T",
        Operator::new()
            .with(TransientTerm::new())
            .with(diffusion(Coefficient::state_dependent("T", |x, _| x * x))),
    )
    .unwrap();
    sys.set_initial("T", InitialCondition::CellAverage(std::sync::Arc::new(|r: f64| 1.0 + r * r)))
        .unwrap();
    sys.initialize(0.0).unwrap();

    let initial = sys.unknowns().values(t).to_vec();
    let mass0 = sys.grids().grid(GridKind::Fluid).unwrap().integrate(&initial);
    let mut solver = Solver::newton(Box::new(DirectLu));
    let stats = solver.solve(&mut sys, 0.1, 0.1).unwrap();
    assert!(stats.iterations > 1);

    let values = sys.unknowns().values(t);
    let mass1 = sys.grids().grid(GridKind::Fluid).unwrap().integrate(values);
    assert!((mass1 - mass0).abs() < 1e-8, "mass changed from {mass0} to {mass1}");
    // Heat flows inwards from the hotter edge.
    assert!(values[0] > initial[0]);
    assert!(values[7] < initial[7]);
}

#[test]
fn diagonal_terms_fill_one_entry_per_row() {
    let grids = GridSet::new(RadialGridGenerator::uniform(2, 0.0, 1.0), 0.0)
        .unwrap()
        .with_kinetic(
            GridKind::HotTail,
            MomentumGridGenerator::PXi {
                np: 4,
                nxi: 3,
                pmin: 0.0,
                pmax: 1.0,
            },
        )
        .unwrap();
    let mut sys = EquationSystem::new(grids);
    let f = sys.add_unknown("f", GridKind::HotTail, true).unwrap();
    sys.set_operator(
        "f",
        "f",
        Operator::new()
            .with(DiagonalTerm::new("weight", Coefficient::profile(|pt| 1.0 + pt.p1 + pt.r)))
            .with(SourceTerm::new("one", Coefficient::Constant(1.0))),
    )
    .unwrap();
    sys.initialize(0.0).unwrap();

    let mut solver = Solver::linear(Box::new(DirectLu));
    solver.solve(&mut sys, 0.0, 1.0).unwrap();

    let csr = solver.matrix().to_csr();
    assert_eq!(csr.nrows(), 24);
    assert!(csr.row_iter().all(|row| row.nnz() == 1));

    let grid = sys.grids().grid(GridKind::HotTail).unwrap();
    let values = sys.unknowns().values(f);
    for ir in 0..grid.nr() {
        let mg = grid.momentum(ir);
        for j in 0..mg.n2() {
            for i in 0..mg.n1() {
                let pt = grid.cell_point(ir, i, j);
                let expected = 1.0 / (1.0 + pt.p1 + pt.r);
                assert!((values[grid.index(ir, i, j)] - expected).abs() < 1e-14);
            }
        }
    }
}

#[test]
fn source_only_equation_fails_validation() {
    let mut sys = fluid_system(4);
    sys.add_unknown("n", GridKind::Fluid, true).unwrap();
    sys.set_operator("n", "n", Operator::new().with(SourceTerm::new("S", Coefficient::Constant(1.0))))
        .unwrap();
    let err = sys.initialize(0.0).unwrap_err();
    assert!(matches!(err, SimulationError::Config { .. }));
    assert!(err.to_string().contains("singular"));
}

#[test]
fn missing_equation_fails_validation() {
    let mut sys = fluid_system(4);
    sys.add_unknown("n", GridKind::Fluid, true).unwrap();
    assert!(sys.initialize(0.0).is_err());
}

#[test]
fn algebraic_unknowns_reproduce_prescribed_values() {
    let mut sys = fluid_system(3);
    let e = sys.add_unknown("E", GridKind::Fluid, false).unwrap();
    let x = sys.add_unknown("x", GridKind::Fluid, true).unwrap();
    sys.set_prescribed(
        "E",
        TimeTable::new(vec![0.0, 1.0], vec![0.0, 1.0], vec![vec![1.0, 3.0], vec![1.0, 3.0]]).unwrap(),
    )
    .unwrap();
    sys.set_operator("x", "x", Operator::new().with(DiagonalTerm::identity(1.0))).unwrap();
    sys.set_operator("x", "E", Operator::new().with(DiagonalTerm::identity(-1.0))).unwrap();
    sys.set_initial("x", InitialCondition::FromEquation).unwrap();
    sys.initialize(0.0).unwrap();

    let expected = sys.unknowns().values(e).to_vec();
    assert_eq!(sys.unknowns().values(x), expected.as_slice());

    let mut solver = Solver::linear(Box::new(DirectLu));
    solver.solve(&mut sys, 0.0, 1.0).unwrap();
    assert_eq!(sys.unknowns().values(x), expected.as_slice());
}

#[test]
fn density_moment_of_uniform_distribution() {
    let grids = GridSet::new(RadialGridGenerator::uniform(2, 0.0, 1.0), 0.0)
        .unwrap()
        .with_kinetic(
            GridKind::HotTail,
            MomentumGridGenerator::PXi {
                np: 50,
                nxi: 4,
                pmin: 0.0,
                pmax: 1.0,
            },
        )
        .unwrap();
    let mut sys = EquationSystem::new(grids);
    sys.add_unknown("f", GridKind::HotTail, false).unwrap();
    let n = sys.add_unknown("n", GridKind::Fluid, true).unwrap();
    sys.set_prescribed("f", TimeTable::constant(1.0)).unwrap();
    sys.set_operator("n", "n", Operator::new().with(DiagonalTerm::identity(1.0))).unwrap();
    sys.set_operator("n", "f", Operator::new().with(MomentTerm::density(-1.0))).unwrap();
    sys.set_initial("n", InitialCondition::FromEquation).unwrap();
    sys.initialize(0.0).unwrap();

    // Integral of 2 pi p^2 over p in [0, 1] and xi in [-1, 1].
    let exact = 4.0 * PI / 3.0;
    for v in sys.unknowns().values(n) {
        assert!((v - exact).abs() < 1e-3 * exact, "{v} vs {exact}");
    }
}
