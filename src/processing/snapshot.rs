use serde::Serialize;

use crate::discretization::GridKind;
use crate::discretization::mesh::Grid;
use crate::physics::system::EquationSystem;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSnapshot {
    pub name: String,
    pub r: Vec<f64>,
    pub r_f: Vec<f64>,
    /// Momentum cell centres of the innermost radius; empty on fluid grids.
    pub p1: Vec<f64>,
    pub p2: Vec<f64>,
    pub n_cells: usize,
}

impl GridSnapshot {
    fn of(grid: &Grid, kind: GridKind) -> Self {
        let (p1, p2) = if kind.is_kinetic() {
            let mg = grid.momentum(0);
            (mg.p1.clone(), mg.p2.clone())
        } else {
            (Vec::new(), Vec::new())
        };
        Self {
            name: grid.name().to_string(),
            r: grid.radial().r.clone(),
            r_f: grid.radial().r_f.clone(),
            p1,
            p2,
            n_cells: grid.n_cells(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnknownSnapshot {
    pub name: String,
    pub grid: String,
    pub multiplicity: usize,
    pub current: Vec<f64>,
    /// One entry per saved time.
    pub history: Vec<Vec<f64>>,
}

/// Copy of everything an output writer needs: grid coordinates, the saved
/// times and the values of every unknown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub times: Vec<f64>,
    pub grids: Vec<GridSnapshot>,
    pub unknowns: Vec<UnknownSnapshot>,
}

impl Snapshot {
    pub fn capture(sys: &EquationSystem) -> Self {
        let grids = GridKind::ALL
            .into_iter()
            .filter_map(|kind| sys.grids().get(kind).map(|g| GridSnapshot::of(g, kind)))
            .collect();
        let unknowns = sys
            .unknowns()
            .iter()
            .map(|(_, q)| UnknownSnapshot {
                name: q.name().to_string(),
                grid: q.grid().name().to_string(),
                multiplicity: q.multiplicity(),
                current: q.current().to_vec(),
                history: q.history().to_vec(),
            })
            .collect();
        Self {
            times: sys.unknowns().saved_times().to_vec(),
            grids,
            unknowns,
        }
    }

    pub fn unknown(&self, name: &str) -> Option<&UnknownSnapshot> {
        self.unknowns.iter().find(|u| u.name == name)
    }

    pub fn grid(&self, name: &str) -> Option<&GridSnapshot> {
        self.grids.iter().find(|g| g.name == name)
    }
}
