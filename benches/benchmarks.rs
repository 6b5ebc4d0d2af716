use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use nalgebra::DVector;

use kfvm_rs::discretization::generator::{MomentumGridGenerator, RadialGridGenerator};
use kfvm_rs::discretization::{GridKind, GridSet};
use kfvm_rs::numerics::backend::{AutoBackend, BiCgStab, DirectLu, LinearBackend};
use kfvm_rs::numerics::solver::Solver;
use kfvm_rs::physics::advection_diffusion::AdvectionDiffusionTerm;
use kfvm_rs::physics::bc::{BoundaryCondition, Direction, Side};
use kfvm_rs::physics::coefficient::Coefficient;
use kfvm_rs::physics::diagonal::DiagonalTerm;
use kfvm_rs::physics::moment::MomentTerm;
use kfvm_rs::physics::operator::Operator;
use kfvm_rs::physics::system::{EquationSystem, InitialCondition};
use kfvm_rs::physics::transient::TransientTerm;

fn problem_sizes() -> Vec<usize> {
    vec![20, 60]
}

fn solver_sizes() -> Vec<usize> {
    vec![10, 30]
}

/// Hot-tail distribution accelerated by a field that depends on its own
/// density, on `nr` radii with `np` momentum cells.
fn runaway_problem(nr: usize, np: usize) -> EquationSystem {
    let grids = GridSet::new(RadialGridGenerator::uniform(nr, 0.0, 1.0), 0.0)
        .unwrap()
        .with_kinetic(
            GridKind::HotTail,
            MomentumGridGenerator::PXi {
                np,
                nxi: 6,
                pmin: 0.0,
                pmax: 1.0,
            },
        )
        .unwrap();
    let mut sys = EquationSystem::new(grids);
    sys.add_unknown("f", GridKind::HotTail, true).unwrap();
    sys.add_unknown("n", GridKind::Fluid, true).unwrap();
    sys.set_operator(
        "f",
        "f",
        Operator::new().with(TransientTerm::new()).with(
            AdvectionDiffusionTerm::new("transport")
                .with_advection(
                    Direction::P1,
                    Coefficient::state_dependent("n", |n, pt| -(n * 0.5 + 1.0) * pt.p2),
                )
                .with_diffusion(Direction::P2, Coefficient::profile(|pt| 0.1 * (1.0 - pt.p2 * pt.p2)))
                .with_diffusion(Direction::Radial, Coefficient::Constant(0.01))
                .with_boundary(Direction::P1, Side::Upper, BoundaryCondition::Absorbing),
        ),
    )
    .unwrap();
    sys.set_operator("n", "n", Operator::new().with(DiagonalTerm::identity(1.0))).unwrap();
    sys.set_operator("n", "f", Operator::new().with(MomentTerm::density(-1.0))).unwrap();
    sys.set_initial("f", InitialCondition::Constant(1.0)).unwrap();
    sys.set_initial("n", InitialCondition::FromEquation).unwrap();
    sys.initialize(0.0).unwrap();
    sys
}

/// A system with a solver whose layout and terms are ready for assembly.
fn prepared(nr: usize, np: usize) -> (EquationSystem, Solver) {
    let mut sys = runaway_problem(nr, np);
    let mut solver = Solver::newton(Box::new(AutoBackend::default()));
    solver.solve(&mut sys, 0.1, 0.1).unwrap();
    (sys, solver)
}

fn bench_matrix_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("matrix_assembly");
    for &size in &problem_sizes() {
        let (sys, mut solver) = prepared(size, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter(|| {
                let rhs = solver.build_matrix(&sys);
                std::hint::black_box(rhs);
            });
        });
    }
    group.finish();
}

fn bench_jacobian_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("jacobian_assembly");
    for &size in &problem_sizes() {
        let (sys, mut solver) = prepared(size, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter(|| {
                let residual = solver.build_vector(&sys);
                solver.build_jacobian(&sys);
                std::hint::black_box((residual, solver.matrix().triplet_count()));
            });
        });
    }
    group.finish();
}

fn bench_newton_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("newton_step");
    group.sample_size(10);
    for &size in &solver_sizes() {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || (runaway_problem(size, size), Solver::newton(Box::new(AutoBackend::default()))),
                |(mut sys, mut solver)| {
                    let _ = solver.solve(&mut sys, 0.1, 0.1);
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_linear_backends(c: &mut Criterion) {
    let mut group = c.benchmark_group("linear_backends");
    group.sample_size(10);
    for &size in &solver_sizes() {
        let (sys, mut solver) = prepared(size, size);
        let rhs: DVector<f64> = solver.build_matrix(&sys);
        let a = solver.matrix().to_csr();
        let backends: Vec<Box<dyn LinearBackend>> = vec![Box::new(DirectLu), Box::new(BiCgStab::default())];
        for backend in backends {
            group.bench_with_input(BenchmarkId::new(backend.name(), size), &size, |b, &_| {
                b.iter(|| {
                    let x = backend.solve(&a, &rhs);
                    std::hint::black_box(x.ok());
                });
            });
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_matrix_assembly,
    bench_jacobian_assembly,
    bench_newton_step,
    bench_linear_backends
);
criterion_main!(benches);
