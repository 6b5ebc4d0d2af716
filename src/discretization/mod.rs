pub mod generator;
pub mod mesh;

use crate::discretization::generator::{MomentumGridGenerator, RadialGridGenerator};
use crate::discretization::mesh::Grid;
use crate::error::{SimResult, SimulationError};

/// Which sub-grid a quantity lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GridKind {
    /// One cell, for global scalars.
    Scalar,
    /// Radial profiles.
    Fluid,
    HotTail,
    Runaway,
}

impl GridKind {
    pub const ALL: [GridKind; 4] = [GridKind::Scalar, GridKind::Fluid, GridKind::HotTail, GridKind::Runaway];

    pub fn is_kinetic(&self) -> bool {
        matches!(self, GridKind::HotTail | GridKind::Runaway)
    }

    pub fn name(&self) -> &'static str {
        match self {
            GridKind::Scalar => "scalar",
            GridKind::Fluid => "fluid",
            GridKind::HotTail => "hottail",
            GridKind::Runaway => "runaway",
        }
    }
}

/// Owner of every sub-grid of a simulation. All sub-grids except the scalar
/// one share the same radial generator.
#[derive(Clone)]
pub struct GridSet {
    scalar: Grid,
    fluid: Grid,
    hottail: Option<Grid>,
    runaway: Option<Grid>,
    radial: RadialGridGenerator,
    t0: f64,
}

impl GridSet {
    pub fn new(radial: RadialGridGenerator, t0: f64) -> SimResult<Self> {
        let scalar = Grid::new(
            "scalar",
            RadialGridGenerator::uniform(1, 0.0, 1.0),
            MomentumGridGenerator::Fluid,
            t0,
        )?;
        let fluid = Grid::new("fluid", radial.clone(), MomentumGridGenerator::Fluid, t0)?;
        Ok(Self {
            scalar,
            fluid,
            hottail: None,
            runaway: None,
            radial,
            t0,
        })
    }

    /// Attach a kinetic grid sharing the fluid radial grid.
    pub fn with_kinetic(mut self, kind: GridKind, momentum: MomentumGridGenerator) -> SimResult<Self> {
        if !kind.is_kinetic() {
            return Err(SimulationError::config(
                "grid set",
                format!("{kind:?} is not a kinetic grid"),
            ));
        }
        let grid = Grid::new(kind.name(), self.radial.clone(), momentum, self.t0)?;
        match kind {
            GridKind::HotTail => self.hottail = Some(grid),
            _ => self.runaway = Some(grid),
        }
        Ok(self)
    }

    pub fn get(&self, kind: GridKind) -> Option<&Grid> {
        match kind {
            GridKind::Scalar => Some(&self.scalar),
            GridKind::Fluid => Some(&self.fluid),
            GridKind::HotTail => self.hottail.as_ref(),
            GridKind::Runaway => self.runaway.as_ref(),
        }
    }

    /// Like [`GridSet::get`], but a disabled grid is a configuration error.
    pub fn grid(&self, kind: GridKind) -> SimResult<&Grid> {
        self.get(kind)
            .ok_or_else(|| SimulationError::config("grid set", format!("the {} grid is not enabled", kind.name())))
    }

    fn get_mut(&mut self, kind: GridKind) -> Option<&mut Grid> {
        match kind {
            GridKind::Scalar => Some(&mut self.scalar),
            GridKind::Fluid => Some(&mut self.fluid),
            GridKind::HotTail => self.hottail.as_mut(),
            GridKind::Runaway => self.runaway.as_mut(),
        }
    }

    /// Whether any grid may change geometry when rebuilt for time `t`.
    pub fn needs_rebuild(&self, t: f64) -> bool {
        GridKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind))
            .any(|grid| grid.needs_rebuild(t))
    }

    /// Put every grid back to its geometry in `saved`, an earlier clone of
    /// this set. Returns the kinds whose generation changed as a result.
    pub fn restore(&mut self, saved: GridSet) -> Vec<GridKind> {
        let GridSet {
            scalar,
            fluid,
            hottail,
            runaway,
            ..
        } = saved;
        let mut changed = Vec::new();
        for (kind, grid) in [
            (GridKind::Scalar, Some(scalar)),
            (GridKind::Fluid, Some(fluid)),
            (GridKind::HotTail, hottail),
            (GridKind::Runaway, runaway),
        ] {
            if let (Some(current), Some(grid)) = (self.get_mut(kind), grid) {
                if current.generation() != grid.generation() {
                    changed.push(kind);
                }
                current.restore(grid);
            }
        }
        changed
    }

    /// Rebuild every grid for time `t`, returning the kinds whose geometry changed.
    pub fn rebuild(&mut self, t: f64) -> SimResult<Vec<GridKind>> {
        let mut changed = Vec::new();
        for kind in GridKind::ALL {
            if let Some(grid) = self.get_mut(kind) {
                if grid.rebuild(t)? {
                    changed.push(kind);
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_grid_is_a_config_error() {
        let grids = GridSet::new(RadialGridGenerator::uniform(3, 0.0, 1.0), 0.0).unwrap();
        let err = grids.grid(GridKind::Runaway).err().unwrap();
        assert!(matches!(err, SimulationError::Config { .. }));
        assert!(err.to_string().contains("runaway"), "{err}");
        assert_eq!(grids.grid(GridKind::Fluid).unwrap().nr(), 3);
    }

    #[test]
    fn restored_grids_never_reuse_a_generation() {
        let mut grids = GridSet::new(RadialGridGenerator::dynamic(4, 0.0, |t| 1.0 + t), 0.0).unwrap();
        let saved = grids.clone();
        assert_eq!(grids.rebuild(1.0).unwrap(), vec![GridKind::Fluid]);
        assert_eq!(grids.grid(GridKind::Fluid).unwrap().generation(), 1);

        assert_eq!(grids.restore(saved), vec![GridKind::Fluid]);
        let fluid = grids.grid(GridKind::Fluid).unwrap();
        assert_eq!(fluid.generation(), 0);
        assert_eq!(fluid.radial().r_f[4], 1.0);

        grids.rebuild(0.5).unwrap();
        assert_eq!(grids.grid(GridKind::Fluid).unwrap().generation(), 2);
    }
}
