use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::discretization::GridKind;
use crate::numerics::transient::RunStats;
use crate::physics::system::EquationSystem;

pub struct GridSummary {
    pub name: String,
    pub nr: usize,
    pub n_cells: usize,
    pub radial_extent: (f64, f64),
    pub min_dr: f64,
    pub max_dr: f64,
    /// Momentum extent of the innermost radius, for kinetic grids.
    pub momentum_extent: Option<(f64, f64)>,
}

pub struct UnknownSummary {
    pub name: String,
    pub grid: String,
    pub size: usize,
    pub solved: bool,
    pub min: f64,
    pub max: f64,
    /// Phase-space integral of the final value, per shard.
    pub integral: Vec<f64>,
}

pub struct RunSummary {
    pub grids: Vec<GridSummary>,
    pub unknowns: Vec<UnknownSummary>,
    pub stats: RunStats,
}

impl RunSummary {
    pub fn from_run(sys: &EquationSystem, stats: RunStats) -> Self {
        let grids = GridKind::ALL
            .into_iter()
            .filter_map(|kind| sys.grids().get(kind).map(|g| (kind, g)))
            .map(|(kind, g)| {
                let radial = g.radial();
                GridSummary {
                    name: g.name().to_string(),
                    nr: g.nr(),
                    n_cells: g.n_cells(),
                    radial_extent: (radial.r_f[0], radial.r_f[g.nr()]),
                    min_dr: radial.dr.iter().copied().fold(f64::INFINITY, f64::min),
                    max_dr: radial.dr.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    momentum_extent: kind.is_kinetic().then(|| {
                        let mg = g.momentum(0);
                        (mg.p1_f[0], mg.p1_f[mg.n1()])
                    }),
                }
            })
            .collect();

        let unknowns = sys
            .unknowns()
            .iter()
            .filter_map(|(_, q)| Some((q, sys.grids().get(q.grid())?)))
            .map(|(q, grid)| {
                let values = q.current();
                UnknownSummary {
                    name: q.name().to_string(),
                    grid: q.grid().name().to_string(),
                    size: q.size(),
                    solved: q.is_nontrivial(),
                    min: values.iter().copied().fold(f64::INFINITY, f64::min),
                    max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    integral: values.chunks(q.cells_per_shard()).map(|shard| grid.integrate(shard)).collect(),
                }
            })
            .collect();

        Self { grids, unknowns, stats }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out, "{:^60}", "SIMULATION SUMMARY")?;
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out)?;

        writeln!(out, "GRIDS")?;
        writeln!(out, "{}", "-".repeat(60))?;
        for g in &self.grids {
            writeln!(out, "{:<10} nr = {:<5} cells = {}", g.name, g.nr, g.n_cells)?;
            writeln!(
                out,
                "           r in [{:.4e}, {:.4e}], dr in [{:.4e}, {:.4e}]",
                g.radial_extent.0, g.radial_extent.1, g.min_dr, g.max_dr
            )?;
            if let Some((pmin, pmax)) = g.momentum_extent {
                writeln!(out, "           p in [{pmin:.4e}, {pmax:.4e}]")?;
            }
        }
        writeln!(out)?;

        writeln!(out, "UNKNOWNS")?;
        writeln!(out, "{}", "-".repeat(60))?;
        for q in &self.unknowns {
            writeln!(
                out,
                "{:<12} {:<8} {:>7} {:<10} min {:>11.4e}  max {:>11.4e}",
                q.name,
                q.grid,
                q.size,
                if q.solved { "solved" } else { "prescribed" },
                q.min,
                q.max
            )?;
            for (shard, integral) in q.integral.iter().enumerate() {
                writeln!(out, "{:<12} integral[{shard}] = {integral:.6e}", "")?;
            }
        }
        writeln!(out)?;

        writeln!(out, "TIME STEPPING")?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "Final time:          {:.6e}", self.stats.t_final)?;
        writeln!(out, "Accepted steps:      {}", self.stats.steps)?;
        writeln!(out, "Retried steps:       {}", self.stats.retries)?;
        writeln!(out, "Rejected steps:      {}", self.stats.rejected)?;
        writeln!(out, "Newton iterations:   {}", self.stats.newton_iterations)?;
        writeln!(out, "{}", "=".repeat(60))?;
        Ok(())
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        self.write_to(&mut file)
    }
}
