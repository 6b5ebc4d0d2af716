use crate::discretization::GridKind;
use crate::error::{SimResult, SimulationError};

/// A named state vector living on one of the sub-grids.
#[derive(Debug, Clone)]
pub struct UnknownQuantity {
    name: String,
    grid: GridKind,
    multiplicity: usize,
    cells: usize,
    nontrivial: bool,
    current: Vec<f64>,
    previous: Vec<f64>,
    initialized: bool,
    history: Vec<Vec<f64>>,
}

impl UnknownQuantity {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> GridKind {
        self.grid
    }

    /// Number of shards (e.g. ion charge states) stacked along the grid.
    pub fn multiplicity(&self) -> usize {
        self.multiplicity
    }

    /// Cells of a single shard.
    pub fn cells_per_shard(&self) -> usize {
        self.cells
    }

    pub fn size(&self) -> usize {
        self.cells * self.multiplicity
    }

    /// Solved by the equation system rather than prescribed.
    pub fn is_nontrivial(&self) -> bool {
        self.nontrivial
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn current(&self) -> &[f64] {
        &self.current
    }

    pub fn previous(&self) -> &[f64] {
        &self.previous
    }

    /// Saved values, one entry per saved time point.
    pub fn history(&self) -> &[Vec<f64>] {
        &self.history
    }
}

#[derive(Debug, Default, Clone)]
pub struct UnknownQuantityHandler {
    quantities: Vec<UnknownQuantity>,
    times: Vec<f64>,
    saved_times: Vec<f64>,
}

impl UnknownQuantityHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a quantity. IDs are assigned in registration order.
    pub fn insert(
        &mut self,
        name: &str,
        grid: GridKind,
        cells: usize,
        multiplicity: usize,
        nontrivial: bool,
    ) -> SimResult<usize> {
        if self.id(name).is_some() {
            return Err(SimulationError::config(
                "unknowns",
                format!("unknown quantity '{name}' is already defined"),
            ));
        }
        if multiplicity == 0 || cells == 0 {
            return Err(SimulationError::config(
                "unknowns",
                format!("unknown quantity '{name}' would be empty"),
            ));
        }
        let n = cells * multiplicity;
        self.quantities.push(UnknownQuantity {
            name: name.to_string(),
            grid,
            multiplicity,
            cells,
            nontrivial,
            current: vec![0.0; n],
            previous: vec![0.0; n],
            initialized: false,
            history: Vec::new(),
        });
        Ok(self.quantities.len() - 1)
    }

    pub fn id(&self, name: &str) -> Option<usize> {
        self.quantities.iter().position(|q| q.name == name)
    }

    pub fn require(&self, name: &str) -> SimResult<usize> {
        self.id(name)
            .ok_or_else(|| SimulationError::config("unknowns", format!("no unknown quantity named '{name}'")))
    }

    pub fn get(&self, id: usize) -> &UnknownQuantity {
        &self.quantities[id]
    }

    pub fn name(&self, id: usize) -> &str {
        &self.quantities[id].name
    }

    pub fn len(&self) -> usize {
        self.quantities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &UnknownQuantity)> {
        self.quantities.iter().enumerate()
    }

    pub fn nontrivial_ids(&self) -> Vec<usize> {
        self.iter().filter(|(_, q)| q.nontrivial).map(|(id, _)| id).collect()
    }

    pub fn values(&self, id: usize) -> &[f64] {
        &self.quantities[id].current
    }

    pub fn previous(&self, id: usize) -> &[f64] {
        &self.quantities[id].previous
    }

    /// Initial value; both buffers are set.
    pub fn set_initial(&mut self, id: usize, values: &[f64]) {
        let q = &mut self.quantities[id];
        assert_eq!(
            values.len(),
            q.current.len(),
            "initial value of '{}' has wrong length",
            q.name
        );
        q.current.copy_from_slice(values);
        q.previous.copy_from_slice(values);
        q.initialized = true;
    }

    /// Overwrite the working value. Only the solver and the prescribed-data
    /// update write here during a step.
    pub fn store(&mut self, id: usize, values: &[f64]) {
        let q = &mut self.quantities[id];
        assert_eq!(values.len(), q.current.len(), "value of '{}' has wrong length", q.name);
        q.current.copy_from_slice(values);
    }

    /// Discard every uncommitted value.
    pub fn rollback(&mut self) {
        for q in &mut self.quantities {
            q.current.copy_from_slice(&q.previous);
        }
    }

    /// Copy the working values into the old-state buffer without recording
    /// a time.
    pub(crate) fn promote(&mut self) {
        for q in &mut self.quantities {
            q.previous.copy_from_slice(&q.current);
        }
    }

    pub(crate) fn committed_values(&self) -> Vec<Vec<f64>> {
        self.quantities.iter().map(|q| q.previous.clone()).collect()
    }

    /// Set both buffers of every unknown from `values`, as returned by
    /// `committed_values`.
    pub(crate) fn reset_to(&mut self, values: &[Vec<f64>]) {
        for (q, v) in self.quantities.iter_mut().zip(values) {
            q.previous.copy_from_slice(v);
            q.current.copy_from_slice(v);
        }
    }

    /// Accept the working values as the state at time `t`.
    pub fn commit(&mut self, t: f64, save: bool) {
        for q in &mut self.quantities {
            q.previous.copy_from_slice(&q.current);
            if save {
                q.history.push(q.current.clone());
            }
        }
        self.times.push(t);
        if save {
            self.saved_times.push(t);
        }
    }

    /// Every committed time.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Times at which `history()` entries were recorded.
    pub fn saved_times(&self) -> &[f64] {
        &self.saved_times
    }
}
