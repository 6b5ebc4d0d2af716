use std::error::Error;
use std::fs;
use std::sync::Arc;

use num_dual::DualNum;

use kfvm_rs::config::SimulationConfig;
use kfvm_rs::discretization::GridKind;
use kfvm_rs::numerics::interp::TimeTable;
use kfvm_rs::numerics::solver::Solver;
use kfvm_rs::numerics::transient::TimeStepper;
use kfvm_rs::physics::advection_diffusion::AdvectionDiffusionTerm;
use kfvm_rs::physics::bc::{BoundaryCondition, Direction, GeneralizedBC, Side};
use kfvm_rs::physics::coefficient::Coefficient;
use kfvm_rs::physics::diagonal::{DiagonalTerm, SourceTerm};
use kfvm_rs::physics::moment::MomentTerm;
use kfvm_rs::physics::operator::Operator;
use kfvm_rs::physics::system::{EquationSystem, InitialCondition};
use kfvm_rs::physics::transient::TransientTerm;
use kfvm_rs::processing::csv_writer;
use kfvm_rs::processing::snapshot::Snapshot;
use kfvm_rs::processing::summary::RunSummary;

/// Cold-electron heat diffusion driven by a prescribed electric field,
/// coupled to a hot-tail distribution accelerated by the same field.
fn build_system(config: &SimulationConfig) -> Result<EquationSystem, Box<dyn Error>> {
    let mut sys = EquationSystem::new(config.grid_set()?).with_save_every(config.time.save_every);

    sys.add_unknown("E_field", GridKind::Fluid, false)?;
    sys.add_unknown("T_cold", GridKind::Fluid, true)?;
    sys.add_unknown("f_hot", GridKind::HotTail, true)?;
    sys.add_unknown("n_hot", GridKind::Fluid, true)?;
    sys.add_unknown("N_hot", GridKind::Scalar, true)?;

    sys.set_prescribed(
        "E_field",
        TimeTable::new(
            vec![config.time.t0, config.time.tmax],
            vec![0.0, config.radial.a],
            vec![vec![0.2, 0.05], vec![0.6, 0.15]],
        )?,
    )?;

    // dT/dt = d/dr (chi(T) dT/dr) + sigma E^2, T fixed at the edge.
    sys.set_operator(
        "T_cold",
        "T_cold",
        Operator::new()
            .with(TransientTerm::new())
            .with(
                AdvectionDiffusionTerm::new("heat diffusion")
                    .with_diffusion(
                        Direction::Radial,
                        Coefficient::state_dependent("T_cold", |t, _| t.powf(2.5) * 0.05),
                    )
                    .with_boundary(
                        Direction::Radial,
                        Side::Upper,
                        BoundaryCondition::Generalized(GeneralizedBC::dirichlet(0.1)),
                    ),
            )
            .with(SourceTerm::new(
                "ohmic heating",
                Coefficient::state_dependent("E_field", |e, _| e * e * 2.0),
            )),
    )?;

    // df/dt + d/dp (-E xi f) = d/dxi (nu df/dxi), particles beyond pmax are lost.
    sys.set_operator(
        "f_hot",
        "f_hot",
        Operator::new().with(TransientTerm::new()).with(
            AdvectionDiffusionTerm::new("hot-tail transport")
                .with_advection(
                    Direction::P1,
                    Coefficient::state_dependent("E_field", |e, pt| -e * pt.p2),
                )
                .with_diffusion(Direction::P2, Coefficient::profile(|pt| 0.05 * (1.0 - pt.p2 * pt.p2)))
                .with_boundary(Direction::P1, Side::Upper, BoundaryCondition::Absorbing),
        ),
    )?;

    // n_hot = int f dp, N_hot = int n_hot dV
    sys.set_operator("n_hot", "n_hot", Operator::new().with(DiagonalTerm::identity(1.0)))?;
    sys.set_operator("n_hot", "f_hot", Operator::new().with(MomentTerm::density(-1.0)))?;
    sys.set_operator("N_hot", "N_hot", Operator::new().with(DiagonalTerm::identity(1.0)))?;
    sys.set_operator("N_hot", "n_hot", Operator::new().with(MomentTerm::volume_integral(-1.0)))?;

    let f0: Vec<f64> = {
        let grid = sys.grids().grid(GridKind::HotTail)?;
        (0..grid.nr())
            .flat_map(|ir| {
                let mg = grid.momentum(ir);
                let r = grid.radial().r[ir];
                (0..mg.n2()).flat_map(move |_| mg.p1.iter().map(move |p| (1.0 - r * r) * (-p * p / 0.02).exp()))
            })
            .collect()
    };
    sys.set_initial("T_cold", InitialCondition::CellAverage(Arc::new(|r: f64| 1.0 - 0.9 * r * r)))?;
    sys.set_initial("f_hot", InitialCondition::Values(f0))?;
    sys.set_initial("n_hot", InitialCondition::FromEquation)?;
    sys.set_initial("N_hot", InitialCondition::FromEquation)?;

    sys.initialize(config.time.t0)?;
    Ok(sys)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    fs::create_dir_all("output/main")?;

    let mut config = SimulationConfig::default();
    config.radial.nr = 20;
    config.hottail.enabled = true;
    config.hottail.np = 40;
    config.hottail.nxi = 8;
    config.time.nt = Some(50);
    config.time.save_every = 5;

    let mut sys = build_system(&config)?;
    let mut solver = Solver::from_config(&config.solver)?;
    let stepper = TimeStepper::from_config(&config.time)?;

    let n_id = sys.unknowns().require("N_hot")?;
    log::info!("initial hot-tail particle content: {:.6e}", sys.unknowns().values(n_id)[0]);

    let stats = stepper.run(&mut sys, &mut solver, |t, sys| {
        log::debug!("t = {t:.4e}: N_hot = {:.6e}", sys.unknowns().values(n_id)[0]);
    })?;

    let snapshot = Snapshot::capture(&sys);
    csv_writer::write_profile_history("output/main/T_cold.csv", &snapshot, "T_cold")?;
    csv_writer::write_profile_history("output/main/n_hot.csv", &snapshot, "n_hot")?;
    csv_writer::write_scalar_traces("output/main/scalars.csv", &snapshot)?;

    let summary = RunSummary::from_run(&sys, stats);
    summary.write_to_file("output/main/simulation_summary.txt")?;
    summary.write_to(&mut std::io::stdout())?;
    log::info!("output written to output/main/");
    Ok(())
}
