//! Process CPU time, memory and processor count.

use std::sync::Mutex;
use std::time::Duration;
use sysinfo::System;

/// Kernel clock ticks per second for `/proc/*/stat` times.
const USER_HZ: u64 = 100;

/// Source of process-level hardware counters.
pub trait HardwareProbe: Send + Sync {
    /// CPU time consumed by the whole process.
    fn process_cpu_time(&self) -> Duration;

    /// CPU time consumed by the calling thread.
    fn thread_cpu_time(&self) -> Duration;

    fn available_memory_bytes(&self) -> u64;

    fn processor_count(&self) -> usize;
}

/// Probe backed by `sysinfo` and, on Linux/Android, `/proc`.
pub struct SystemProbe {
    system: Mutex<System>,
    processors: usize,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        let processors = match system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        Self {
            system: Mutex::new(system),
            processors,
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareProbe for SystemProbe {
    fn process_cpu_time(&self) -> Duration {
        proc_stat_cpu_time("/proc/self/stat").unwrap_or_default()
    }

    fn thread_cpu_time(&self) -> Duration {
        thread_schedstat()
            .or_else(|| proc_stat_cpu_time("/proc/thread-self/stat"))
            .unwrap_or_default()
    }

    fn available_memory_bytes(&self) -> u64 {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_memory();
        system.available_memory()
    }

    fn processor_count(&self) -> usize {
        self.processors
    }
}

/// utime + stime from a `/proc/<pid>/stat` style file.
fn proc_stat_cpu_time(path: &str) -> Option<Duration> {
    let stat = std::fs::read_to_string(path).ok()?;
    parse_stat_ticks(&stat).map(|ticks| Duration::from_millis(ticks * 1000 / USER_HZ))
}

fn parse_stat_ticks(stat: &str) -> Option<u64> {
    // The command name may contain spaces; fields resume after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // utime and stime are fields 14 and 15 of the full line
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// Nanosecond-resolution thread run time.
fn thread_schedstat() -> Option<Duration> {
    let s = std::fs::read_to_string("/proc/thread-self/schedstat").ok()?;
    let ns: u64 = s.split_whitespace().next()?.parse().ok()?;
    Some(Duration::from_nanos(ns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_ticks() {
        let line = "1234 (my (odd) app) S 1 1234 1234 0 -1 4194560 100 0 0 0 250 50 0 0 20 0 8 0";
        assert_eq!(parse_stat_ticks(line), Some(300));
        assert_eq!(parse_stat_ticks("garbage"), None);
    }

    #[test]
    fn test_system_probe_basics() {
        let probe = SystemProbe::new();
        assert!(probe.processor_count() >= 1);
        let first = probe.process_cpu_time();
        let second = probe.process_cpu_time();
        assert!(second >= first);
    }
}
