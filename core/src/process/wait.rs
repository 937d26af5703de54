//! Batch waiting across a set of outstanding children
//!
//! One reaping pass serves many handles: terminations are collected with
//! wait-any probes and claimed against the caller's handle list by pid.
//! Children reaped here that no handle tracks are discarded; a wait-any
//! probe can race with other reapers in the same process, so callers should
//! funnel all reaping of a child set through one place.

use super::{Process, POLL_INTERVAL};
use crate::{ProcError, Result};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use schema::WaitInfo;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Map a wait status to the terminal exit code convention: the exit code in
/// `[0, 255]` for a normal exit, `-1` for death by signal, `None` for events
/// that are not terminations.
pub(crate) fn terminal_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, _, _) => Some(-1),
        _ => None,
    }
}

/// Wait across `processes` and collect up to `maxn` completion records.
///
/// Records carry the position of the reaped handle in `processes`, its pid,
/// and its terminal status; they are emitted in reaping order, not submission
/// order. Reaped handles are retired in place exactly as a single wait would
/// retire them, so a handle never produces a second record.
///
/// `timeout` selects the blocking mode:
/// - `None` blocks until the OS reports one termination, then drains any
///   further already-terminated children without blocking;
/// - `Some(Duration::ZERO)` is a single non-blocking drain;
/// - `Some(d)` polls non-blocking drains until a record is found or the
///   deadline passes.
///
/// An empty result means no tracked child terminated in time. Mechanism
/// failures are errors.
pub fn wait_list(
    processes: &mut [Process],
    maxn: usize,
    timeout: Option<Duration>,
) -> Result<Vec<WaitInfo>> {
    let mut records = Vec::new();
    if maxn == 0 || processes.is_empty() {
        return Ok(records);
    }

    match timeout {
        None => {
            // One blocking wait-any probe, then a non-blocking drain
            if let Some((pid, code)) = reap_any(None)? {
                claim(processes, &mut records, pid, code);
            }
            drain(processes, &mut records, maxn)?;
        }
        Some(d) if d.is_zero() => {
            drain(processes, &mut records, maxn)?;
        }
        Some(d) => {
            let deadline = Instant::now() + d;
            loop {
                drain(processes, &mut records, maxn)?;
                if !records.is_empty() {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep((deadline - now).min(POLL_INTERVAL));
            }
        }
    }

    debug!(
        "wait_list collected {} record(s) across {} handle(s)",
        records.len(),
        processes.len()
    );
    Ok(records)
}

/// Drain already-terminated children without blocking, claiming each one
/// against the handle list, until `maxn` records exist or nothing is left.
fn drain(processes: &mut [Process], records: &mut Vec<WaitInfo>, maxn: usize) -> Result<()> {
    while records.len() < maxn {
        match reap_any(Some(WaitPidFlag::WNOHANG))? {
            Some((pid, code)) => {
                claim(processes, records, pid, code);
            }
            None => break,
        }
    }
    Ok(())
}

/// Match one reaped termination against the handle list. An unmatched pid
/// belongs to a child spawned outside this list and is dropped.
fn claim(processes: &mut [Process], records: &mut Vec<WaitInfo>, pid: Pid, code: i32) {
    for (index, process) in processes.iter_mut().enumerate() {
        if process.pid_raw() == pid.as_raw() {
            records.push(WaitInfo {
                index,
                pid: pid.as_raw() as u32,
                status: code,
            });
            process.mark_reaped(code);
            return;
        }
    }
    trace!("Discarding termination of untracked process {}", pid);
}

/// One wait-any probe. `Ok(None)` means nothing terminated (or there are no
/// children left at all).
fn reap_any(flags: Option<WaitPidFlag>) -> Result<Option<(Pid, i32)>> {
    loop {
        match waitpid(Pid::from_raw(-1), flags) {
            Ok(WaitStatus::StillAlive) => return Ok(None),
            Ok(status) => {
                if let (Some(pid), Some(code)) = (status.pid(), terminal_code(status)) {
                    return Ok(Some((pid, code)));
                }
                // Non-terminal event; probe again
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Ok(None),
            Err(e) => return Err(ProcError::Wait(format!("waitpid(-1) failed: {}", e))),
        }
    }
}
