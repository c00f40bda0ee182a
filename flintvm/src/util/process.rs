//! PID liveness helpers.

/// Send SIGKILL to `pid`.
///
/// Returns `true` when the process was killed or no longer exists.
pub fn kill_process(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGKILL) == 0 || !is_process_alive(pid) }
}

/// Check whether a process with `pid` exists, using the null signal.
///
/// A zombie that has not been reaped still counts as alive.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_pid_zero_is_never_alive() {
        assert!(!is_process_alive(0));
    }

    #[test]
    fn test_kill_reaped_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(kill_process(pid));
        child.wait().unwrap();
        assert!(!is_process_alive(pid));
    }
}
