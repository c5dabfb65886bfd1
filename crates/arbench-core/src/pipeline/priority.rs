//! Stage thread priorities.
//!
//! On Linux and Android priorities are per thread: `setpriority` with the
//! kernel thread id changes only the calling thread. Other platforms keep the
//! default scheduler priority.

use std::io;

/// Scheduling priority for a pipeline stage thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagePriority {
    #[default]
    Normal,
    /// Nice -8, Android's `THREAD_PRIORITY_URGENT_DISPLAY`.
    Elevated,
}

impl StagePriority {
    /// Nice value for this priority. Lower values are scheduled first.
    pub fn nice(self) -> i32 {
        match self {
            StagePriority::Normal => 0,
            StagePriority::Elevated => -8,
        }
    }

    /// Apply to the calling thread. `Normal` leaves the thread untouched.
    pub fn apply_to_current_thread(self) -> io::Result<()> {
        match self {
            StagePriority::Normal => Ok(()),
            StagePriority::Elevated => set_current_thread_nice(self.nice()),
        }
    }

    /// Apply to the calling thread, falling back to the current priority
    /// with a warning when the OS refuses. Returns whether it was applied.
    pub fn apply_or_warn(self, stage: &str) -> bool {
        match self.apply_to_current_thread() {
            Ok(()) => {
                log::debug!("{} thread running at {:?} priority", stage, self);
                true
            }
            Err(e) => {
                log::warn!(
                    "Could not set {} thread to nice {}: {}; keeping the default priority",
                    stage,
                    self.nice(),
                    e
                );
                false
            }
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn current_thread_id() -> libc::id_t {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as libc::id_t }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_current_thread_nice(nice: i32) -> io::Result<()> {
    // SAFETY: plain syscall on our own thread id; failure is reported via errno.
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, current_thread_id(), nice) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_current_thread_nice(_nice: i32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "per-thread priority is not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevated_is_scheduled_before_normal() {
        assert!(StagePriority::Elevated.nice() < StagePriority::Normal.nice());
        assert_eq!(StagePriority::default(), StagePriority::Normal);
    }

    #[test]
    fn test_normal_priority_leaves_thread_alone() {
        assert!(StagePriority::Normal.apply_to_current_thread().is_ok());
        assert!(StagePriority::Normal.apply_or_warn("test"));
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_elevated_applies_or_keeps_current_priority() {
        let (before, applied, after) = std::thread::spawn(|| {
            // SAFETY: reads our own thread's nice value.
            let read = || unsafe { libc::getpriority(libc::PRIO_PROCESS, current_thread_id()) };
            let before = read();
            let applied = StagePriority::Elevated.apply_or_warn("test");
            (before, applied, read())
        })
        .join()
        .unwrap();

        if applied {
            assert_eq!(after, StagePriority::Elevated.nice());
        } else {
            assert_eq!(after, before);
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    #[test]
    fn test_elevated_reports_unsupported() {
        let err = StagePriority::Elevated.apply_to_current_thread().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(!StagePriority::Elevated.apply_or_warn("test"));
    }
}
