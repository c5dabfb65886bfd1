//! CPU usage derived from CPU time over wall time.

use super::probe::HardwareProbe;
use std::time::{Duration, Instant};

/// Which CPU time counter a meter reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuClock {
    /// Time spent by the thread that calls [`CpuUsageMeter::read`]
    #[default]
    CallingThread,
    /// Time spent by every thread of the process
    Process,
}

/// Computes `usage% = (cpu delta / wall delta) / processors * 100`.
///
/// The first reading after construction or [`reset`](CpuUsageMeter::reset)
/// has no previous point and returns the cached value.
#[derive(Debug, Clone)]
pub struct CpuUsageMeter {
    clock: CpuClock,
    last: Option<(Duration, Instant)>,
    cached: f64,
}

impl CpuUsageMeter {
    pub fn new(clock: CpuClock) -> Self {
        Self {
            clock,
            last: None,
            cached: 0.0,
        }
    }

    pub fn clock(&self) -> CpuClock {
        self.clock
    }

    pub fn read(&mut self, probe: &dyn HardwareProbe) -> f64 {
        let cpu = match self.clock {
            CpuClock::CallingThread => probe.thread_cpu_time(),
            CpuClock::Process => probe.process_cpu_time(),
        };
        self.observe(cpu, Instant::now(), probe.processor_count())
    }

    /// Record a CPU time sample taken at `wall`.
    pub fn observe(&mut self, cpu: Duration, wall: Instant, processors: usize) -> f64 {
        if let Some((last_cpu, last_wall)) = self.last {
            let wall_delta = wall.saturating_duration_since(last_wall);
            if !wall_delta.is_zero() {
                let cpu_delta = cpu.saturating_sub(last_cpu);
                let share = cpu_delta.as_secs_f64() / wall_delta.as_secs_f64();
                self.cached = share / processors.max(1) as f64 * 100.0;
            }
        }
        self.last = Some((cpu, wall));
        self.cached
    }

    /// Forget the previous sample point; the cached value is kept.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn cached(&self) -> f64 {
        self.cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_returns_cached() {
        let mut meter = CpuUsageMeter::new(CpuClock::Process);
        let t0 = Instant::now();
        assert_eq!(meter.observe(Duration::from_millis(500), t0, 4), 0.0);
    }

    #[test]
    fn test_usage_formula() {
        let mut meter = CpuUsageMeter::new(CpuClock::Process);
        let t0 = Instant::now();
        meter.observe(Duration::ZERO, t0, 4);
        // 1s of CPU over 1s of wall on 4 cores = 25%
        let usage = meter.observe(Duration::from_secs(1), t0 + Duration::from_secs(1), 4);
        assert!((usage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_gap_keeps_cached_value() {
        let mut meter = CpuUsageMeter::new(CpuClock::CallingThread);
        let t0 = Instant::now();
        meter.observe(Duration::ZERO, t0, 2);
        meter.observe(Duration::from_millis(500), t0 + Duration::from_secs(1), 2);
        meter.reset();
        // A large jump after the gap must not produce a spike.
        let after_gap = meter.observe(Duration::from_secs(100), t0 + Duration::from_secs(2), 2);
        assert!((after_gap - 25.0).abs() < 1e-9);
    }
}
