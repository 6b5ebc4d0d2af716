#![allow(unused)]
use std::cell::RefCell;
use std::time::Duration;

/// Wall time spent in each phase of the solver, collected only with the
/// `timing` feature.
#[derive(Default, Clone, Debug)]
pub struct TimingStats {
    pub rebuild_times: Vec<Duration>,
    pub assembly_times: Vec<Duration>,
    pub linear_solve_times: Vec<Duration>,
    pub total_time: Duration,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "timing")]
    pub fn log_summary(&self) {
        if self.assembly_times.is_empty() {
            return;
        }
        let total = |v: &[Duration]| v.iter().sum::<Duration>();
        let rebuild = total(&self.rebuild_times);
        let assembly = total(&self.assembly_times);
        let linear = total(&self.linear_solve_times);
        let overhead = self.total_time.saturating_sub(rebuild + assembly + linear);

        log::info!("solver timing: total {:.3}s", self.total_time.as_secs_f64());
        log::info!(
            "  rebuild   {:>9.3}ms ({} calls)",
            rebuild.as_secs_f64() * 1000.0,
            self.rebuild_times.len()
        );
        log::info!(
            "  assembly  {:>9.3}ms ({} calls)",
            assembly.as_secs_f64() * 1000.0,
            self.assembly_times.len()
        );
        log::info!(
            "  linear    {:>9.3}ms ({} calls, avg {:.3}ms)",
            linear.as_secs_f64() * 1000.0,
            self.linear_solve_times.len(),
            linear.as_secs_f64() * 1000.0 / self.linear_solve_times.len().max(1) as f64
        );
        log::info!("  other     {:>9.3}ms", overhead.as_secs_f64() * 1000.0);
    }

    #[cfg(not(feature = "timing"))]
    pub fn log_summary(&self) {}
}

#[cfg(feature = "timing")]
thread_local! {
    static TIMING_STATS: RefCell<TimingStats> = RefCell::new(TimingStats::new());
}

#[cfg(feature = "timing")]
pub fn reset_timing() {
    TIMING_STATS.with(|stats| {
        *stats.borrow_mut() = TimingStats::new();
    });
}

#[cfg(not(feature = "timing"))]
pub fn reset_timing() {}

#[cfg(feature = "timing")]
fn record<F, R>(f: F, slot: fn(&mut TimingStats) -> &mut Vec<Duration>) -> R
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    TIMING_STATS.with(|stats| slot(&mut stats.borrow_mut()).push(elapsed));
    result
}

#[cfg(feature = "timing")]
pub fn record_rebuild<F: FnOnce() -> R, R>(f: F) -> R {
    record(f, |s| &mut s.rebuild_times)
}

#[cfg(feature = "timing")]
pub fn record_assembly<F: FnOnce() -> R, R>(f: F) -> R {
    record(f, |s| &mut s.assembly_times)
}

#[cfg(feature = "timing")]
pub fn record_linear_solve<F: FnOnce() -> R, R>(f: F) -> R {
    record(f, |s| &mut s.linear_solve_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_rebuild<F: FnOnce() -> R, R>(f: F) -> R {
    f()
}

#[cfg(not(feature = "timing"))]
pub fn record_assembly<F: FnOnce() -> R, R>(f: F) -> R {
    f()
}

#[cfg(not(feature = "timing"))]
pub fn record_linear_solve<F: FnOnce() -> R, R>(f: F) -> R {
    f()
}

#[cfg(feature = "timing")]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TIMING_STATS.with(|stats| {
        let mut s = stats.borrow_mut();
        s.total_time = total_time;
        s.clone()
    })
}

#[cfg(not(feature = "timing"))]
pub fn finalize_timing(_total_time: Duration) -> TimingStats {
    TimingStats::new()
}

/// Log the phase breakdown collected since the last `reset_timing`.
pub fn finalize_and_log(total_time: Duration) {
    finalize_timing(total_time).log_summary();
}
