use std::cell::Cell;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::discretization::generator::{AxisSpacing, MomentumGridGenerator, RadialGridGenerator, RadialJacobian};
use crate::discretization::{GridKind, GridSet};
use crate::error::{SimResult, SimulationError};
use crate::numerics::backend::BackendKind;
use crate::numerics::solver::SolverKind;
use crate::numerics::transient::StepperKind;
use crate::numerics::{Convergence, ConvergenceMetric, Tolerance};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialGridConfig {
    pub nr: usize,
    pub r0: f64,
    /// Minor radius.
    pub a: f64,
    pub geometry: RadialJacobian,
}

impl Default for RadialGridConfig {
    fn default() -> Self {
        Self {
            nr: 10,
            r0: 0.0,
            a: 1.0,
            geometry: RadialJacobian::Slab,
        }
    }
}

/// A p-xi momentum grid. Its lower momentum bound follows from which grids
/// are enabled.
///
/// With `npsep > 0` the first `npsep` momentum cells cover `[pmin, psep]`
/// and the rest `[psep, pmax]`. Likewise `nxisep > 0` puts that many pitch
/// cells in `[xisep, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KineticGridConfig {
    pub enabled: bool,
    pub np: usize,
    pub nxi: usize,
    pub pmax: f64,
    pub psep: f64,
    pub npsep: usize,
    pub xisep: f64,
    pub nxisep: usize,
}

impl Default for KineticGridConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            np: 50,
            nxi: 10,
            pmax: 1.0,
            psep: 0.0,
            npsep: 0,
            xisep: 0.0,
            nxisep: 0,
        }
    }
}

impl KineticGridConfig {
    fn validate(&self, name: &str, pmin: f64) -> SimResult<()> {
        let err = |msg: String| Err(SimulationError::config(name, msg));
        if self.np == 0 || self.nxi == 0 {
            return err("np and nxi must be positive".into());
        }
        if !(self.pmax > pmin) {
            return err(format!("pmax = {} must exceed pmin = {pmin}", self.pmax));
        }
        if self.npsep > 0 && (self.npsep >= self.np || !(self.psep > pmin && self.psep < self.pmax)) {
            return err(format!(
                "need 0 < npsep < np and pmin < psep < pmax, got npsep = {}, psep = {}",
                self.npsep, self.psep
            ));
        }
        if self.nxisep > 0 && (self.nxisep >= self.nxi || !(self.xisep > -1.0 && self.xisep < 1.0)) {
            return err(format!(
                "need 0 < nxisep < nxi and -1 < xisep < 1, got nxisep = {}, xisep = {}",
                self.nxisep, self.xisep
            ));
        }
        Ok(())
    }

    fn generator(&self, pmin: f64) -> MomentumGridGenerator {
        if self.npsep == 0 && self.nxisep == 0 {
            return MomentumGridGenerator::PXi {
                np: self.np,
                nxi: self.nxi,
                pmin,
                pmax: self.pmax,
            };
        }
        let p = match self.npsep {
            0 => AxisSpacing::Uniform { n: self.np },
            n => AxisSpacing::BiUniform {
                split: self.psep,
                n_lo: n,
                n_hi: self.np - n,
            },
        };
        let xi = match self.nxisep {
            0 => AxisSpacing::Uniform { n: self.nxi },
            n => AxisSpacing::BiUniform {
                split: self.xisep,
                n_lo: self.nxi - n,
                n_hi: n,
            },
        };
        MomentumGridGenerator::PXiSplit {
            p,
            xi,
            pmin,
            pmax: self.pmax,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub kind: SolverKind,
    pub max_iterations: usize,
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub damping: f64,
    pub backend: BackendKind,
    pub linear_tolerance: f64,
    pub linear_max_iterations: usize,
    /// `(abs_tol, rel_tol)` overrides keyed by unknown name.
    pub per_unknown: BTreeMap<String, (f64, f64)>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            kind: SolverKind::Newton,
            max_iterations: 100,
            abs_tol: 1e-12,
            rel_tol: 1e-8,
            damping: 1.0,
            backend: BackendKind::Auto,
            linear_tolerance: 1e-12,
            linear_max_iterations: 2000,
            per_unknown: BTreeMap::new(),
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> SimResult<()> {
        let err = |msg: String| Err(SimulationError::config("solver", msg));
        if self.max_iterations == 0 {
            return err("max_iterations must be positive".into());
        }
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return err(format!("damping {} outside (0, 1]", self.damping));
        }
        let tolerances = std::iter::once((self.abs_tol, self.rel_tol)).chain(self.per_unknown.values().copied());
        for (abs, rel) in tolerances {
            if abs < 0.0 || rel < 0.0 || abs + rel <= 0.0 {
                return err(format!("tolerance ({abs}, {rel}) accepts nothing"));
            }
        }
        if self.backend != BackendKind::DirectLu && !(self.linear_tolerance > 0.0 && self.linear_max_iterations > 0) {
            return err("the Krylov backend needs a positive tolerance and iteration limit".into());
        }
        Ok(())
    }

    pub fn convergence(&self) -> Convergence {
        Convergence {
            tolerance: Tolerance::Combined(self.abs_tol, self.rel_tol),
            metric: ConvergenceMetric::L2Norm,
            per_unknown: self
                .per_unknown
                .iter()
                .map(|(name, &(abs, rel))| (name.clone(), Tolerance::Combined(abs, rel)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeStepConfig {
    pub kind: StepperKind,
    pub t0: f64,
    pub tmax: f64,
    /// Step length, or the first step of the adaptive stepper.
    pub dt: Option<f64>,
    pub nt: Option<usize>,
    pub max_retries: usize,
    pub save_every: usize,
    /// Adaptive stepper: tolerance on the step-doubling error estimate.
    pub abs_tol: f64,
    pub rel_tol: f64,
    /// Adaptive stepper: estimate the error on every n-th step only, 0 for
    /// every step.
    pub check_every: usize,
    pub dt_min: f64,
    pub dt_max: Option<f64>,
}

impl Default for TimeStepConfig {
    fn default() -> Self {
        Self {
            kind: StepperKind::Constant,
            t0: 0.0,
            tmax: 1.0,
            dt: None,
            nt: Some(10),
            max_retries: 4,
            save_every: 1,
            abs_tol: 1e-10,
            rel_tol: 1e-3,
            check_every: 0,
            dt_min: 0.0,
            dt_max: None,
        }
    }
}

impl TimeStepConfig {
    pub fn validate(&self) -> SimResult<()> {
        let err = |msg: String| Err(SimulationError::config("time stepper", msg));
        if !(self.tmax > self.t0) {
            return err(format!("tmax = {} must exceed t0 = {}", self.tmax, self.t0));
        }
        match (self.dt, self.nt) {
            (Some(_), Some(_)) => err("only one of dt and nt may be given".into()),
            (None, None) => err("one of dt and nt must be given".into()),
            (Some(dt), None) if !(dt > 0.0) => err(format!("dt = {dt} must be positive")),
            (None, Some(0)) => err("nt must be positive".into()),
            _ if self.save_every == 0 => err("save_every must be positive".into()),
            _ if self.kind == StepperKind::Constant => Ok(()),
            _ if self.abs_tol < 0.0 || self.rel_tol < 0.0 || self.abs_tol + self.rel_tol <= 0.0 => {
                err(format!("tolerance ({}, {}) accepts nothing", self.abs_tol, self.rel_tol))
            }
            _ if !(self.dt_min >= 0.0) => err(format!("dt_min = {} must not be negative", self.dt_min)),
            _ if self.dt_max.is_some_and(|m| !(m > self.dt_min)) => {
                err(format!("dt_max = {:?} must exceed dt_min = {}", self.dt_max, self.dt_min))
            }
            _ => Ok(()),
        }
    }

    /// Acceptance test for the adaptive stepper's error estimate.
    pub fn convergence(&self) -> Convergence {
        Convergence {
            tolerance: Tolerance::Combined(self.abs_tol, self.rel_tol),
            ..Convergence::default()
        }
    }
}

/// Everything needed to set up the grids, solver and time stepper.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub radial: RadialGridConfig,
    pub hottail: KineticGridConfig,
    pub runaway: KineticGridConfig,
    pub solver: SolverConfig,
    pub time: TimeStepConfig,
}

impl SimulationConfig {
    /// Lower momentum bound of the runaway grid.
    pub fn runaway_pmin(&self) -> f64 {
        if self.hottail.enabled { self.hottail.pmax } else { 0.0 }
    }

    pub fn validate(&self) -> SimResult<()> {
        let r = &self.radial;
        if r.nr == 0 || !(r.a > r.r0) || r.r0 < 0.0 {
            return Err(SimulationError::config(
                "radial grid",
                format!("need nr > 0 and 0 <= r0 < a, got nr = {}, r0 = {}, a = {}", r.nr, r.r0, r.a),
            ));
        }
        for (name, grid, pmin) in [
            ("hottail grid", &self.hottail, 0.0),
            ("runaway grid", &self.runaway, self.runaway_pmin()),
        ] {
            if grid.enabled {
                grid.validate(name, pmin)?;
            }
        }
        self.solver.validate()?;
        self.time.validate()
    }

    /// Build the grids described by this configuration at `time.t0`.
    pub fn grid_set(&self) -> SimResult<GridSet> {
        self.validate()?;
        let radial = RadialGridGenerator::uniform(self.radial.nr, self.radial.r0, self.radial.a)
            .with_jacobian(self.radial.geometry);
        let mut grids = GridSet::new(radial, self.time.t0)?;
        for (kind, grid, pmin) in [
            (GridKind::HotTail, &self.hottail, 0.0),
            (GridKind::Runaway, &self.runaway, self.runaway_pmin()),
        ] {
            if grid.enabled {
                grids = grids.with_kinetic(kind, grid.generator(pmin))?;
            }
        }
        Ok(grids)
    }

    /// Register every option with its default value.
    pub fn define_settings(settings: &mut Settings) {
        let d = Self::default();
        settings.define_int("radialgrid/nr", d.radial.nr as i64, "number of radial cells");
        settings.define_real("radialgrid/r0", d.radial.r0, "inner radius");
        settings.define_real("radialgrid/a", d.radial.a, "minor radius");
        settings.define_bool("radialgrid/cylindrical", false, "use the cylindrical radial Jacobian");
        for (prefix, grid) in [("hottailgrid", &d.hottail), ("runawaygrid", &d.runaway)] {
            settings.define_bool(&format!("{prefix}/enabled"), grid.enabled, "enable this kinetic grid");
            settings.define_int(&format!("{prefix}/np"), grid.np as i64, "number of momentum cells");
            settings.define_int(&format!("{prefix}/nxi"), grid.nxi as i64, "number of pitch cells");
            settings.define_real(&format!("{prefix}/pmax"), grid.pmax, "upper momentum bound");
            settings.define_real(&format!("{prefix}/psep"), grid.psep, "momentum separating the two uniform pieces");
            settings.define_int(&format!("{prefix}/npsep"), grid.npsep as i64, "momentum cells below psep, 0 for a uniform grid");
            settings.define_real(&format!("{prefix}/xisep"), grid.xisep, "pitch separating the two uniform pieces");
            settings.define_int(&format!("{prefix}/nxisep"), grid.nxisep as i64, "pitch cells above xisep, 0 for a uniform grid");
        }
        settings.define_bool("solver/linear", false, "take one linear solve per step instead of Newton");
        settings.define_int("solver/maxiter", d.solver.max_iterations as i64, "Newton iteration limit");
        settings.define_real("solver/abstol", d.solver.abs_tol, "absolute tolerance on the Newton update");
        settings.define_real("solver/reltol", d.solver.rel_tol, "relative tolerance on the Newton update");
        settings.define_real("solver/damping", d.solver.damping, "fraction of each Newton update applied");
        settings.define_bool("solver/iterative", false, "always use BiCGStab, even for systems small enough for a dense LU");
        settings.define_bool("timestep/adaptive", false, "choose the step length from a step-doubling error estimate");
        settings.define_real("timestep/t0", d.time.t0, "start time");
        settings.define_real("timestep/tmax", d.time.tmax, "end time");
        settings.define_real("timestep/dt", 0.0, "time step, 0 when nt is used");
        settings.define_int("timestep/nt", 0, "number of time steps, 0 when dt is used");
        settings.define_int("timestep/maxretries", d.time.max_retries as i64, "step halvings before giving up");
        settings.define_int("timestep/saveevery", d.time.save_every as i64, "save every n-th step");
        settings.define_real("timestep/abstol", d.time.abs_tol, "absolute tolerance of the adaptive stepper");
        settings.define_real("timestep/reltol", d.time.rel_tol, "relative tolerance of the adaptive stepper");
        settings.define_int("timestep/checkevery", d.time.check_every as i64, "estimate the error every n-th step, 0 for every step");
        settings.define_real("timestep/dtmin", d.time.dt_min, "smallest step the adaptive stepper may take");
        settings.define_real("timestep/dtmax", 0.0, "largest step the adaptive stepper may take, 0 for no limit");
    }

    /// Read every option from `settings` and validate the result.
    pub fn from_settings(settings: &Settings) -> SimResult<Self> {
        let count = |key: &str| -> SimResult<usize> {
            let v = settings.get_int(key)?;
            usize::try_from(v).map_err(|_| SimulationError::config("settings", format!("'{key}' = {v} must not be negative")))
        };
        let kinetic = |prefix: &str| -> SimResult<KineticGridConfig> {
            Ok(KineticGridConfig {
                enabled: settings.get_bool(&format!("{prefix}/enabled"))?,
                np: count(&format!("{prefix}/np"))?,
                nxi: count(&format!("{prefix}/nxi"))?,
                pmax: settings.get_real(&format!("{prefix}/pmax"))?,
                psep: settings.get_real(&format!("{prefix}/psep"))?,
                npsep: count(&format!("{prefix}/npsep"))?,
                xisep: settings.get_real(&format!("{prefix}/xisep"))?,
                nxisep: count(&format!("{prefix}/nxisep"))?,
            })
        };
        let dt = settings.get_real("timestep/dt")?;
        let nt = count("timestep/nt")?;
        let dt_max = settings.get_real("timestep/dtmax")?;
        let config = Self {
            radial: RadialGridConfig {
                nr: count("radialgrid/nr")?,
                r0: settings.get_real("radialgrid/r0")?,
                a: settings.get_real("radialgrid/a")?,
                geometry: if settings.get_bool("radialgrid/cylindrical")? {
                    RadialJacobian::Cylindrical
                } else {
                    RadialJacobian::Slab
                },
            },
            hottail: kinetic("hottailgrid")?,
            runaway: kinetic("runawaygrid")?,
            solver: SolverConfig {
                kind: if settings.get_bool("solver/linear")? { SolverKind::Linear } else { SolverKind::Newton },
                max_iterations: count("solver/maxiter")?,
                abs_tol: settings.get_real("solver/abstol")?,
                rel_tol: settings.get_real("solver/reltol")?,
                damping: settings.get_real("solver/damping")?,
                backend: if settings.get_bool("solver/iterative")? { BackendKind::BiCgStab } else { BackendKind::Auto },
                ..SolverConfig::default()
            },
            time: TimeStepConfig {
                kind: if settings.get_bool("timestep/adaptive")? { StepperKind::Adaptive } else { StepperKind::Constant },
                t0: settings.get_real("timestep/t0")?,
                tmax: settings.get_real("timestep/tmax")?,
                dt: (dt != 0.0).then_some(dt),
                nt: (nt != 0).then_some(nt),
                max_retries: count("timestep/maxretries")?,
                save_every: count("timestep/saveevery")?,
                abs_tol: settings.get_real("timestep/abstol")?,
                rel_tol: settings.get_real("timestep/reltol")?,
                check_every: count("timestep/checkevery")?,
                dt_min: settings.get_real("timestep/dtmin")?,
                dt_max: (dt_max != 0.0).then_some(dt_max),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingValue {
    Real(f64),
    Int(i64),
    Bool(bool),
    Reals(Vec<f64>),
}

impl SettingValue {
    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Real(_) => "real",
            SettingValue::Int(_) => "integer",
            SettingValue::Bool(_) => "bool",
            SettingValue::Reals(_) => "real array",
        }
    }
}

#[derive(Debug, Clone)]
struct Setting {
    value: SettingValue,
    description: String,
    overridden: bool,
    used: Cell<bool>,
}

/// Typed key-value store of options. Every key must be defined, with a
/// default, before it can be set or read.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    entries: BTreeMap<String, Setting>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    fn define(&mut self, key: &str, value: SettingValue, description: &str) {
        self.entries.insert(
            key.to_string(),
            Setting {
                value,
                description: description.to_string(),
                overridden: false,
                used: Cell::new(false),
            },
        );
    }

    pub fn define_real(&mut self, key: &str, default: f64, description: &str) {
        self.define(key, SettingValue::Real(default), description);
    }

    pub fn define_int(&mut self, key: &str, default: i64, description: &str) {
        self.define(key, SettingValue::Int(default), description);
    }

    pub fn define_bool(&mut self, key: &str, default: bool, description: &str) {
        self.define(key, SettingValue::Bool(default), description);
    }

    pub fn define_reals(&mut self, key: &str, default: Vec<f64>, description: &str) {
        self.define(key, SettingValue::Reals(default), description);
    }

    /// Override a defined key. An integer may be given for a real option.
    pub fn set(&mut self, key: &str, value: SettingValue) -> SimResult<()> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| SimulationError::config("settings", format!("unrecognized option '{key}'")))?;
        let value = match (&entry.value, value) {
            (SettingValue::Real(_), SettingValue::Int(i)) => SettingValue::Real(i as f64),
            (SettingValue::Reals(_), SettingValue::Real(x)) => SettingValue::Reals(vec![x]),
            (old, new) if std::mem::discriminant(old) == std::mem::discriminant(&new) => new,
            (old, new) => {
                return Err(SimulationError::config(
                    "settings",
                    format!("'{key}' expects a {}, got a {}", old.type_name(), new.type_name()),
                ));
            }
        };
        entry.value = value;
        entry.overridden = true;
        Ok(())
    }

    fn lookup(&self, key: &str) -> SimResult<&SettingValue> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| SimulationError::config("settings", format!("option '{key}' was never defined")))?;
        entry.used.set(true);
        Ok(&entry.value)
    }

    fn mismatch(key: &str, expected: &str, found: &SettingValue) -> SimulationError {
        SimulationError::config(
            "settings",
            format!("'{key}' was read as a {expected} but holds a {}", found.type_name()),
        )
    }

    pub fn get_real(&self, key: &str) -> SimResult<f64> {
        match self.lookup(key)? {
            SettingValue::Real(x) => Ok(*x),
            other => Err(Self::mismatch(key, "real", other)),
        }
    }

    pub fn get_int(&self, key: &str) -> SimResult<i64> {
        match self.lookup(key)? {
            SettingValue::Int(i) => Ok(*i),
            other => Err(Self::mismatch(key, "integer", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> SimResult<bool> {
        match self.lookup(key)? {
            SettingValue::Bool(b) => Ok(*b),
            other => Err(Self::mismatch(key, "bool", other)),
        }
    }

    pub fn get_reals(&self, key: &str) -> SimResult<Vec<f64>> {
        match self.lookup(key)? {
            SettingValue::Reals(v) => Ok(v.clone()),
            other => Err(Self::mismatch(key, "real array", other)),
        }
    }

    pub fn description(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.description.as_str())
    }

    /// Keys that were explicitly set but never read.
    pub fn unused_keys(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.overridden && !e.used.get())
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Settings {
        let mut s = Settings::new();
        SimulationConfig::define_settings(&mut s);
        s
    }

    #[test]
    fn settings_round_trip_into_config() {
        let mut s = defaults();
        s.set("radialgrid/nr", SettingValue::Int(4)).unwrap();
        s.set("timestep/dt", SettingValue::Int(1)).unwrap();
        s.set("timestep/tmax", SettingValue::Real(10.0)).unwrap();
        s.set("hottailgrid/enabled", SettingValue::Bool(true)).unwrap();
        s.set("runawaygrid/enabled", SettingValue::Bool(true)).unwrap();
        s.set("runawaygrid/pmax", SettingValue::Real(5.0)).unwrap();

        let config = SimulationConfig::from_settings(&s).unwrap();
        assert_eq!(config.radial.nr, 4);
        assert_eq!(config.time.dt, Some(1.0));
        assert_eq!(config.time.nt, None);
        assert_eq!(config.runaway_pmin(), 1.0);
        assert!(s.unused_keys().is_empty());
    }

    #[test]
    fn type_mismatch_is_a_config_error() {
        let mut s = defaults();
        assert!(s.set("radialgrid/nr", SettingValue::Bool(true)).is_err());
        assert!(s.set("no/such/key", SettingValue::Int(1)).is_err());
        assert!(s.get_bool("radialgrid/a").is_err());
    }

    #[test]
    fn unused_overrides_are_reported() {
        let mut s = defaults();
        s.define_reals("eqsys/n_i/data", vec![], "ion density");
        s.set("eqsys/n_i/data", SettingValue::Real(1.0)).unwrap();
        assert_eq!(s.unused_keys(), vec!["eqsys/n_i/data"]);
        assert_eq!(s.get_reals("eqsys/n_i/data").unwrap(), vec![1.0]);
        assert!(s.unused_keys().is_empty());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{"radial": {"nr": 7}, "time": {"dt": 0.5, "nt": null}}"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.radial.nr, 7);
        assert_eq!(config.radial.a, RadialGridConfig::default().a);
        assert_eq!(config.time.dt, Some(0.5));
        assert_eq!(config.solver, SolverConfig::default());
        config.validate().unwrap();

        let text = serde_json::to_string(&config).unwrap();
        let back: SimulationConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn dt_and_nt_are_exclusive() {
        let mut config = SimulationConfig::default();
        config.time.dt = Some(0.1);
        assert!(config.validate().is_err());
        config.time.nt = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn adaptive_settings_reach_the_stepper_config() {
        let mut s = defaults();
        s.set("timestep/adaptive", SettingValue::Bool(true)).unwrap();
        s.set("timestep/reltol", SettingValue::Real(1e-4)).unwrap();
        s.set("timestep/checkevery", SettingValue::Int(5)).unwrap();
        s.set("timestep/dtmax", SettingValue::Real(0.5)).unwrap();
        let config = SimulationConfig::from_settings(&s).unwrap();
        assert_eq!(config.time.kind, StepperKind::Adaptive);
        assert_eq!(config.time.check_every, 5);
        assert_eq!(config.time.dt_max, Some(0.5));
        assert_eq!(config.time.convergence().tolerance, Tolerance::Combined(1e-10, 1e-4));

        let mut config = config;
        config.time.abs_tol = 0.0;
        config.time.rel_tol = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn biuniform_settings_build_a_split_grid() {
        let mut s = defaults();
        s.set("hottailgrid/enabled", SettingValue::Bool(true)).unwrap();
        s.set("hottailgrid/np", SettingValue::Int(20)).unwrap();
        s.set("hottailgrid/npsep", SettingValue::Int(15)).unwrap();
        s.set("hottailgrid/psep", SettingValue::Real(0.2)).unwrap();
        let config = SimulationConfig::from_settings(&s).unwrap();
        let grids = config.grid_set().unwrap();
        let mg = grids.grid(GridKind::HotTail).unwrap().momentum(0);
        assert_eq!(mg.n1(), 20);
        assert!((mg.p1_f[15] - 0.2).abs() < 1e-15);
        assert_eq!(mg.n2(), 10);

        let mut config = config;
        config.hottail.npsep = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn runaway_grid_starts_where_hottail_ends() {
        let mut config = SimulationConfig::default();
        config.hottail.enabled = true;
        config.hottail.pmax = 2.0;
        config.runaway.enabled = true;
        config.runaway.pmax = 1.5;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("runaway"), "{msg}");
    }
}
