//! Resource ceilings applied to every script process.
//!
//! | Limit | Value |
//! |-------|-------|
//! | `RLIMIT_CPU` | 10 s soft, 11 s hard |
//! | `RLIMIT_AS` | 512 MiB |
//! | `RLIMIT_NPROC` | 10 |
//! | `RLIMIT_NOFILE` | 20 |
//! | harness alarm | 25 s |
//! | supervisory timeout | 30 s |
//!
//! These are fixed. The alarm must stay below the supervisory timeout so the
//! harness can report its own structured timeout before the parent kills it.
//! The CPU hard limit sits one second above the soft one: the kernel sends
//! `SIGXCPU` at the soft limit and `SIGKILL` only at the hard one.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_seconds: u64,
    pub address_space_bytes: u64,
    pub max_processes: u64,
    pub max_open_files: u64,
    pub alarm: Duration,
    pub supervisory_timeout: Duration,
}

pub const LIMITS: ResourceLimits = ResourceLimits {
    cpu_seconds: 10,
    address_space_bytes: 512 * 1024 * 1024,
    max_processes: 10,
    max_open_files: 20,
    alarm: Duration::from_secs(25),
    supervisory_timeout: Duration::from_secs(30),
};

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

impl ResourceLimits {
    /// `(resource, soft, hard)` for every ceiling the child gets.
    pub(crate) fn ceilings(&self) -> [(Resource, u64, u64); 4] {
        [
            (libc::RLIMIT_CPU, self.cpu_seconds, self.cpu_seconds + 1),
            (libc::RLIMIT_AS, self.address_space_bytes, self.address_space_bytes),
            (libc::RLIMIT_NPROC, self.max_processes, self.max_processes),
            (libc::RLIMIT_NOFILE, self.max_open_files, self.max_open_files),
        ]
    }

    /// Lower the calling process's limits, ignoring any the host refuses.
    ///
    /// Runs between `fork` and `exec`, so it must stay async-signal-safe:
    /// no allocation, no locking, no logging.
    pub(crate) fn apply_best_effort(&self) {
        for (resource, soft, hard) in self.ceilings() {
            let _ = set_rlimit(resource, soft, hard);
        }
    }
}

fn set_rlimit(resource: Resource, soft: u64, hard: u64) -> std::io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: rlim is a valid, initialised struct and resource is a libc constant.
    if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_fires_before_supervisor() {
        assert!(LIMITS.alarm < LIMITS.supervisory_timeout);
    }

    #[test]
    fn test_cpu_ceiling_below_alarm() {
        assert!(Duration::from_secs(LIMITS.cpu_seconds) < LIMITS.alarm);
    }

    #[test]
    fn test_cpu_soft_limit_below_hard() {
        let [(resource, soft, hard), ..] = LIMITS.ceilings();
        assert_eq!(resource, libc::RLIMIT_CPU);
        assert_eq!(soft, LIMITS.cpu_seconds);
        assert!(hard > soft);
    }

    #[test]
    fn test_other_ceilings_are_pinned() {
        for (resource, soft, hard) in LIMITS.ceilings().into_iter().skip(1) {
            assert_eq!(soft, hard, "resource {:?}", resource);
        }
    }
}
