//! Process liveness probing.
//!
//! Used to tell whether the process that wrote a `running` status record is
//! still around. The probe is `kill(pid, 0)`, which checks existence and
//! permissions without delivering a signal.

/// Probe for whether a process ID refers to a live process
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the OS process table
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessProbe;

impl LivenessProbe for ProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }
}

/// Check whether `pid` is a live process.
///
/// `ESRCH` means the process is gone. `EPERM` means it exists but belongs to
/// someone else, which still counts as alive. PID 0 and values outside the
/// `pid_t` range address process groups or nothing at all and report dead.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM and anything unexpected: assume the owner is still there.
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}
