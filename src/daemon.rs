//! Fork-to-background after the clipboard has been claimed.
//!
//! Must run while the process is still single-threaded: before the
//! dispatch thread and the tokio runtime exist.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;

use nix::libc;
use nix::unistd::{ForkResult, Pid, fork, setsid};

/// Which side of the fork we are on.
#[derive(Debug)]
pub enum Role {
    /// The invoking process; it should exit right away.
    Parent(Pid),
    /// The detached process that keeps serving.
    Child,
}

/// Fork, start a new session in the child, and point its stdin and
/// stdout at `/dev/null` so a shell capturing our output is not held
/// open. Stderr stays attached for diagnostics.
pub fn detach() -> nix::Result<Role> {
    // SAFETY: called before any other thread is spawned, so the child
    // inherits a consistent address space.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => Ok(Role::Parent(child)),
        ForkResult::Child => {
            setsid()?;

            let null = OpenOptions::new()
                .read(true)
                .write(true)
                .open("/dev/null")
                .map_err(|e| {
                    e.raw_os_error()
                        .map_or(nix::Error::EIO, nix::Error::from_raw)
                })?;
            let null_fd = null.as_raw_fd();
            // SAFETY: both descriptors are valid; dup2 replaces the
            // standard descriptor atomically.
            if unsafe { libc::dup2(null_fd, libc::STDIN_FILENO) } < 0
                || unsafe { libc::dup2(null_fd, libc::STDOUT_FILENO) } < 0
            {
                return Err(nix::Error::last());
            }
            Ok(Role::Child)
        }
    }
}
