//! Owner liveness probing.

/// Whether `pid` names a running process.
///
/// Sends the null signal: success or `EPERM` (exists, owned by someone
/// else) mean alive, `ESRCH` means dead. Any other error is treated as
/// alive so an unknown state never steals a lock.
#[cfg(unix)]
#[must_use]
pub fn pid_is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// Whether `pid` names a running process.
///
/// Without a signal probe every non-zero PID is assumed alive; staleness
/// then relies on the age timeout alone.
#[cfg(not(unix))]
#[must_use]
pub fn pid_is_alive(pid: u32) -> bool {
    pid != 0
}
