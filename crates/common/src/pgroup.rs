//! Process-group signalling.
//!
//! Children are spawned into their own process group (pgid == child pid), so
//! one signal reaches the child and every descendant it forked. On non-POSIX
//! targets these degrade to no-ops; the platform substitute (a Job Object)
//! is not implemented here.

use std::io;

/// True when the process group is still alive.
#[cfg(unix)]
pub fn group_exists(pgid: i32) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    killpg(Pid::from_raw(pgid), None).is_ok()
}

/// SIGTERM the whole group. A vanished group is not an error.
#[cfg(unix)]
pub fn terminate_group(pgid: i32) -> io::Result<()> {
    signal_group(pgid, nix::sys::signal::Signal::SIGTERM)
}

/// SIGKILL the whole group. A vanished group is not an error.
#[cfg(unix)]
pub fn kill_group(pgid: i32) -> io::Result<()> {
    signal_group(pgid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn signal_group(pgid: i32, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
    }
}

#[cfg(not(unix))]
pub fn group_exists(_pgid: i32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn terminate_group(_pgid: i32) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn kill_group(_pgid: i32) -> io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_group_probes_false_and_signals_ok() {
        // A pgid far above pid_max on any sane test box.
        let bogus = 2_000_000_000;
        assert!(!group_exists(bogus));
        assert!(terminate_group(bogus).is_ok());
        assert!(kill_group(bogus).is_ok());
    }

    #[test]
    fn own_group_exists() {
        let pgid = nix::unistd::getpgrp().as_raw();
        assert!(group_exists(pgid));
    }
}
