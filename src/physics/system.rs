use std::collections::BTreeMap;

use crate::discretization::generator::ProfileFn;
use crate::discretization::{GridKind, GridSet};
use crate::error::{SimResult, SimulationError};
use crate::numerics::backend::AutoBackend;
use crate::numerics::interp::{Interpolator1D, TimeTable};
use crate::numerics::quadrature::{Quadrature, QuadratureBackend};
use crate::numerics::solver::Solver;
use crate::physics::operator::Operator;
use crate::physics::unknowns::UnknownQuantityHandler;
use crate::physics::{RebuildContext, TermBinding};

/// How an unknown obtains its value at the initial time.
#[derive(Clone)]
pub enum InitialCondition {
    Values(Vec<f64>),
    Constant(f64),
    /// Radial profile, broadcast over momentum space and shards.
    Profile(Interpolator1D),
    /// Average of a radial function over each radial cell.
    CellAverage(ProfileFn),
    /// Solve the unknown's own equation at the initial time, with every
    /// other unknown held at its initial value.
    FromEquation,
}

/// Every operator contributing to the row of one unknown, keyed by source.
#[derive(Default)]
pub struct UnknownEquation {
    operators: BTreeMap<usize, Operator>,
}

impl UnknownEquation {
    /// (source unknown, operator) pairs.
    pub fn operators(&self) -> impl Iterator<Item = (usize, &Operator)> {
        self.operators.iter().map(|(&id, op)| (id, op))
    }

    pub fn diagonal(&self, target: usize) -> Option<&Operator> {
        self.operators.get(&target)
    }
}

/// Unknowns, grids and the equations tying them together.
pub struct EquationSystem {
    grids: GridSet,
    unknowns: UnknownQuantityHandler,
    equations: BTreeMap<usize, UnknownEquation>,
    prescribed: BTreeMap<usize, TimeTable>,
    initial: BTreeMap<usize, InitialCondition>,
    save_every: usize,
    steps: usize,
    /// Grids as of the last commit, taken before the first rebuild that
    /// may move them.
    committed_grids: Option<GridSet>,
    /// Set when the grids were restored and the terms still cache the
    /// discarded geometry.
    terms_behind_grids: bool,
}

impl EquationSystem {
    pub fn new(grids: GridSet) -> Self {
        Self {
            grids,
            unknowns: UnknownQuantityHandler::new(),
            equations: BTreeMap::new(),
            prescribed: BTreeMap::new(),
            initial: BTreeMap::new(),
            save_every: 1,
            steps: 0,
            committed_grids: None,
            terms_behind_grids: false,
        }
    }

    /// Save the unknowns every `n`-th accepted step.
    pub fn with_save_every(mut self, n: usize) -> Self {
        self.save_every = n.max(1);
        self
    }

    pub fn grids(&self) -> &GridSet {
        &self.grids
    }

    pub fn unknowns(&self) -> &UnknownQuantityHandler {
        &self.unknowns
    }

    pub(crate) fn unknowns_mut(&mut self) -> &mut UnknownQuantityHandler {
        &mut self.unknowns
    }

    pub fn equation(&self, target: usize) -> Option<&UnknownEquation> {
        self.equations.get(&target)
    }

    pub fn add_unknown(&mut self, name: &str, grid: GridKind, nontrivial: bool) -> SimResult<usize> {
        self.add_unknown_shards(name, grid, 1, nontrivial)
    }

    /// Register an unknown made of `multiplicity` copies of the grid.
    pub fn add_unknown_shards(
        &mut self,
        name: &str,
        grid: GridKind,
        multiplicity: usize,
        nontrivial: bool,
    ) -> SimResult<usize> {
        let cells = self
            .grids
            .get(grid)
            .ok_or_else(|| {
                SimulationError::config(
                    "equation system",
                    format!("'{name}' is defined on the {} grid, which is not enabled", grid.name()),
                )
            })?
            .n_cells();
        self.unknowns.insert(name, grid, cells, multiplicity, nontrivial)
    }

    /// Register `operator` as the (target, source) block of the target's equation.
    pub fn set_operator(&mut self, target: &str, source: &str, mut operator: Operator) -> SimResult<()> {
        let target_id = self.unknowns.require(target)?;
        let source_id = self.unknowns.require(source)?;
        if !self.unknowns.get(target_id).is_nontrivial() {
            return Err(SimulationError::config(
                "equation system",
                format!("'{target}' is prescribed and cannot have an equation"),
            ));
        }
        let equation = self.equations.entry(target_id).or_default();
        if equation.operators.contains_key(&source_id) {
            return Err(SimulationError::config(
                "equation system",
                format!("the equation for '{target}' already has an operator acting on '{source}'"),
            ));
        }
        let binding = TermBinding {
            target: target_id,
            source: source_id,
        };
        operator.bind(binding, &self.unknowns).map_err(|e| e.with_context(target))?;
        operator.grid_rebuilt(&self.grids).map_err(|e| e.with_context(target))?;
        equation.operators.insert(source_id, operator);
        Ok(())
    }

    /// Tabulated values for a prescribed (trivial) unknown.
    pub fn set_prescribed(&mut self, name: &str, data: TimeTable) -> SimResult<()> {
        let id = self.unknowns.require(name)?;
        if self.unknowns.get(id).is_nontrivial() {
            return Err(SimulationError::config(
                "equation system",
                format!("'{name}' is solved for and cannot be prescribed"),
            ));
        }
        self.prescribed.insert(id, data);
        Ok(())
    }

    pub fn set_initial(&mut self, name: &str, initial: InitialCondition) -> SimResult<()> {
        let id = self.unknowns.require(name)?;
        self.initial.insert(id, initial);
        Ok(())
    }

    /// Check that every solved unknown has a well-posed equation whose terms
    /// agree with the declared unknown sizes.
    pub fn validate(&self) -> SimResult<()> {
        let err = |msg: String| Err(SimulationError::config("equation system", msg));
        for (id, q) in self.unknowns.iter() {
            if !q.is_nontrivial() {
                if matches!(self.initial.get(&id), Some(InitialCondition::FromEquation)) {
                    return err(format!("prescribed unknown '{}' has no equation to initialise from", q.name()));
                }
                continue;
            }
            let Some(equation) = self.equations.get(&id) else {
                return err(format!("no equation was given for '{}'", q.name()));
            };
            match equation.diagonal(id) {
                Some(op) if op.is_well_posed() => {}
                _ => {
                    return err(format!(
                        "the equation for '{}' has no term acting on '{}' itself, so its row is singular",
                        q.name(),
                        q.name()
                    ));
                }
            }
            if matches!(self.initial.get(&id), Some(InitialCondition::FromEquation))
                && equation.operators().any(|(_, op)| op.has_transient_term())
            {
                return err(format!("'{}' has a time derivative and cannot be initialised from its equation", q.name()));
            }
            for (source, op) in equation.operators() {
                let expected = (q.size(), self.unknowns.get(source).size());
                for term in op.terms() {
                    if term.shape() != expected {
                        return err(format!(
                            "term '{}' in the equation for '{}' has shape {:?}, expected {:?}",
                            term.name(),
                            q.name(),
                            term.shape(),
                            expected
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate, then assign initial values at `t0` and record them as the
    /// first saved state.
    pub fn initialize(&mut self, t0: f64) -> SimResult<()> {
        self.validate()?;
        let quad = Quadrature::default();
        let mut from_equation = Vec::new();
        for id in 0..self.unknowns.len() {
            let q = self.unknowns.get(id);
            let n = q.size();
            let grid = self.grids.grid(q.grid())?;
            let values = match (self.prescribed.get(&id), self.initial.get(&id)) {
                (_, Some(InitialCondition::Values(v))) => {
                    if v.len() != n {
                        return Err(SimulationError::config(
                            "initial condition",
                            format!("'{}' expects {} values, got {}", q.name(), n, v.len()),
                        ));
                    }
                    v.clone()
                }
                (_, Some(InitialCondition::Constant(c))) => vec![*c; n],
                (_, Some(InitialCondition::Profile(f))) => broadcast(grid, q.multiplicity(), |ir| f.eval(grid.radial().r[ir])),
                (_, Some(InitialCondition::CellAverage(f))) => {
                    let radial = grid.radial();
                    let mut avg = Vec::with_capacity(grid.nr());
                    for ir in 0..grid.nr() {
                        let total = quad.integrate(&|r| f(r), radial.r_f[ir], radial.r_f[ir + 1])?;
                        avg.push(total / radial.dr[ir]);
                    }
                    broadcast(grid, q.multiplicity(), |ir| avg[ir])
                }
                (_, Some(InitialCondition::FromEquation)) => {
                    from_equation.push(id);
                    vec![0.0; n]
                }
                (Some(table), None) => broadcast(grid, q.multiplicity(), |ir| table.eval(t0, grid.radial().r[ir])),
                (None, None) => {
                    log::debug!("'{}' has no initial condition and starts from zero", q.name());
                    vec![0.0; n]
                }
            };
            self.unknowns.set_initial(id, &values);
        }

        if !from_equation.is_empty() {
            let mut solver = Solver::newton(Box::new(AutoBackend::default())).restricted_to(from_equation.clone());
            solver
                .solve_algebraic(self, t0)
                .map_err(|e| e.with_context("initial condition"))?;
            for &id in &from_equation {
                let values = self.unknowns.values(id).to_vec();
                self.unknowns.set_initial(id, &values);
            }
        }

        self.steps = 0;
        self.unknowns.commit(t0, true);
        Ok(())
    }

    /// Rebuild the grids for time `t` and let every term react to changed geometry.
    ///
    /// A grid may change its number of cells only while no unknown lives on
    /// it. On error the grids are left as they were before the call.
    pub fn rebuild_grids(&mut self, t: f64) -> SimResult<()> {
        self.sync_terms()?;
        if !self.grids.needs_rebuild(t) {
            return Ok(());
        }
        if self.committed_grids.is_none() {
            self.committed_grids = Some(self.grids.clone());
        }
        let before = self.grids.clone();
        let result = self.apply_grid_rebuild(t);
        if result.is_err() {
            if !self.grids.restore(before).is_empty() {
                self.terms_behind_grids = true;
            }
            self.sync_terms()?;
        }
        result
    }

    fn apply_grid_rebuild(&mut self, t: f64) -> SimResult<()> {
        let changed = self.grids.rebuild(t)?;
        if changed.is_empty() {
            return Ok(());
        }
        for (_, q) in self.unknowns.iter() {
            let cells = self.grids.grid(q.grid())?.n_cells();
            if changed.contains(&q.grid()) && cells != q.cells_per_shard() {
                return Err(SimulationError::config(
                    "equation system",
                    format!(
                        "grid '{}' went from {} to {cells} cells at t = {t:.4e} while '{}' lives on it",
                        q.grid().name(),
                        q.cells_per_shard(),
                        q.name()
                    ),
                ));
            }
        }
        self.notify_terms()
    }

    fn notify_terms(&mut self) -> SimResult<()> {
        for (&target, equation) in &mut self.equations {
            for op in equation.operators.values_mut() {
                op.grid_rebuilt(&self.grids)
                    .map_err(|e| e.with_context(self.unknowns.name(target)))?;
            }
        }
        Ok(())
    }

    fn sync_terms(&mut self) -> SimResult<()> {
        if self.terms_behind_grids {
            self.notify_terms()?;
            self.terms_behind_grids = false;
        }
        Ok(())
    }

    /// Put the grids back to their geometry at the last commit.
    fn restore_grids(&mut self) {
        if let Some(saved) = self.committed_grids.take() {
            if !self.grids.restore(saved).is_empty() {
                log::debug!("grids restored to their committed geometry");
                self.terms_behind_grids = true;
            }
        }
    }

    /// Write prescribed values for time `t` into the unknowns that carry them.
    pub fn update_prescribed(&mut self, t: f64) -> SimResult<()> {
        for (&id, table) in &self.prescribed {
            let q = self.unknowns.get(id);
            let grid = self.grids.grid(q.grid())?;
            let values = broadcast(grid, q.multiplicity(), |ir| table.eval(t, grid.radial().r[ir]));
            self.unknowns.store(id, &values);
        }
        Ok(())
    }

    /// Rebuild every term of every equation. Completes for all terms before
    /// any assembly starts.
    pub fn rebuild_terms(&mut self, t: f64, dt: f64) -> SimResult<()> {
        let targets: Vec<usize> = self.equations.keys().copied().collect();
        self.rebuild_equations(&targets, t, dt)
    }

    /// Rebuild the terms in the equations of `targets` only.
    pub fn rebuild_equations(&mut self, targets: &[usize], t: f64, dt: f64) -> SimResult<()> {
        self.sync_terms()?;
        let ctx = RebuildContext {
            t,
            dt,
            unknowns: &self.unknowns,
            grids: &self.grids,
        };
        for (&target, equation) in &mut self.equations {
            if !targets.contains(&target) {
                continue;
            }
            for op in equation.operators.values_mut() {
                op.rebuild(&ctx).map_err(|e| e.with_context(ctx.unknowns.name(target)))?;
            }
        }
        Ok(())
    }

    /// Accept the current values as the state at `t`.
    pub fn commit(&mut self, t: f64) {
        self.steps += 1;
        let save = self.steps % self.save_every == 0;
        self.unknowns.commit(t, save);
        self.committed_grids = None;
    }

    /// Discard the uncommitted values and any grid rebuilt since the last
    /// commit.
    pub fn rollback(&mut self) {
        self.unknowns.rollback();
        self.restore_grids();
    }

    /// Committed values of every unknown, for returning to the start of a
    /// step that is taken in several solves.
    pub(crate) fn checkpoint(&self) -> Vec<Vec<f64>> {
        self.unknowns.committed_values()
    }

    /// Treat the current values as the old state of the next solve without
    /// committing them.
    pub(crate) fn advance_substep(&mut self) {
        self.unknowns.promote();
    }

    /// Return to `checkpoint` and to the committed grids.
    pub(crate) fn reset_to(&mut self, checkpoint: &[Vec<f64>]) {
        self.unknowns.reset_to(checkpoint);
        self.restore_grids();
    }
}

/// Expand a radial profile over momentum cells and shards.
fn broadcast(grid: &crate::discretization::mesh::Grid, multiplicity: usize, f: impl Fn(usize) -> f64) -> Vec<f64> {
    let mut shard = vec![0.0; grid.n_cells()];
    for ir in 0..grid.nr() {
        let v = f(ir);
        let end = grid.offset(ir + 1);
        shard[grid.offset(ir)..end].fill(v);
    }
    shard.repeat(multiplicity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::RadialGridGenerator;
    use crate::physics::diagonal::{DiagonalTerm, SourceTerm};
    use crate::physics::coefficient::Coefficient;

    fn system(nr: usize) -> EquationSystem {
        EquationSystem::new(GridSet::new(RadialGridGenerator::uniform(nr, 0.0, 1.0), 0.0).unwrap())
    }

    #[test]
    fn duplicate_operators_are_rejected() {
        let mut sys = system(2);
        sys.add_unknown("n", GridKind::Fluid, true).unwrap();
        sys.set_operator("n", "n", Operator::new().with(DiagonalTerm::identity(1.0))).unwrap();
        let err = sys
            .set_operator("n", "n", Operator::new().with(DiagonalTerm::identity(1.0)))
            .unwrap_err();
        assert!(matches!(err, SimulationError::Config { .. }));
    }

    #[test]
    fn source_only_row_is_ill_posed() {
        let mut sys = system(2);
        sys.add_unknown("n", GridKind::Fluid, true).unwrap();
        sys.set_operator("n", "n", Operator::new().with(SourceTerm::new("zero", Coefficient::Constant(0.0))))
            .unwrap();
        let msg = sys.validate().unwrap_err().to_string();
        assert!(msg.contains("singular"), "{msg}");
    }

    #[test]
    fn prescribed_unknowns_follow_their_table() {
        let mut sys = system(2);
        sys.add_unknown("E", GridKind::Fluid, false).unwrap();
        sys.set_prescribed("E", TimeTable::time_series(vec![0.0, 1.0], vec![0.0, 2.0]).unwrap())
            .unwrap();
        sys.initialize(0.0).unwrap();
        sys.update_prescribed(0.25).unwrap();
        assert_eq!(sys.unknowns().values(0), &[0.5, 0.5]);
    }
}
