//! Cooperative waiting on an async runtime
//!
//! Termination is still observed with non-blocking OS probes; between probes
//! the task yields to the runtime with a timer sleep instead of parking the
//! thread. Dropping the future between probes abandons the wait without
//! side effects on the child.

use crate::process::{terminal_code, POLL_INTERVAL};
use crate::{ProcError, Result};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

/// Poll `pid` for termination, yielding between probes.
///
/// `Ok(None)` means the deadline passed with the child still running.
pub(crate) async fn wait_exit(pid: Pid, timeout: Option<Duration>) -> Result<Option<i32>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status) => {
                if let Some(code) = terminal_code(status) {
                    return Ok(Some(code));
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(ProcError::Wait(format!("waitpid({}) failed: {}", pid, e)));
            }
        }

        let sleep_for = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return Ok(None);
                }
                (d - now).min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };
        tokio::time::sleep(sleep_for).await;
    }
}
