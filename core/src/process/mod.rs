//! Process lifecycle management
//!
//! The [`Process`] handle owns one spawned child: it carries the OS pid, the
//! recorded exit status once the child has been reaped, an optional opaque
//! tag for the caller, and whatever teardown state the spawn strategy left
//! behind. Waiting is offered blocking, polling, bounded, and cooperatively
//! on an async runtime; [`wait_list`] reaps across a whole set of handles.

mod spawn;
mod wait;

pub use spawn::{
    default_strategy, ForkExecStrategy, PosixSpawnStrategy, Redirect, SpawnOptions, SpawnStrategy,
};
pub use wait::wait_list;

pub(crate) use spawn::BackendState;
pub(crate) use wait::terminal_code;

use crate::{tokenize, ProcError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use schema::SpawnSpec;
use std::any::Any;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound on one sleep between termination probes. Bounded waits never
/// oversleep their deadline by more than this.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(60);

/// Handle to one spawned child process.
///
/// The handle stays valid after the child terminates: once a wait has reaped
/// the child, the exit status is recorded and later waits return it without
/// touching the OS again. The pid accessor returns `None` from that point on.
pub struct Process {
    /// OS pid while the child is un-reaped, 0 afterwards
    pid: libc::pid_t,
    /// Recorded exit status once reaped
    status: Option<i32>,
    /// Caller-owned tag, never interpreted
    tag: Option<Box<dyn Any + Send>>,
    /// Strategy-specific teardown state
    state: BackendState,
}

impl Process {
    /// Spawn `program` with the platform's default strategy.
    ///
    /// `args` is the full argument vector (conventionally starting with the
    /// program itself); an empty slice is treated as `[program]`.
    pub fn spawn(program: &str, args: &[&str], options: SpawnOptions) -> Result<Process> {
        Self::spawn_with(default_strategy(), program, args, options)
    }

    /// Spawn with an explicitly chosen strategy
    pub fn spawn_with(
        strategy: &dyn SpawnStrategy,
        program: &str,
        args: &[&str],
        options: SpawnOptions,
    ) -> Result<Process> {
        strategy.spawn(program, args, options)
    }

    /// Tokenize a single command string and spawn its first token as the
    /// program, passing the full token list as the argument vector.
    pub fn spawn_command(command: &str, options: SpawnOptions) -> Result<Process> {
        let line = tokenize(command)?;
        let program = line
            .get(0)
            .ok_or_else(|| {
                ProcError::InvalidProcess("command string contains no tokens".to_string())
            })?
            .to_string();
        let args: Vec<&str> = line.args().collect();
        Self::spawn(&program, &args, options)
    }

    /// Spawn from a declarative [`SpawnSpec`]
    pub fn spawn_spec(spec: &SpawnSpec) -> Result<Process> {
        Self::spawn_command(&spec.command, SpawnOptions::from_spec(spec))
    }

    pub(crate) fn from_spawn(
        pid: libc::pid_t,
        state: BackendState,
        tag: Option<Box<dyn Any + Send>>,
    ) -> Self {
        Self {
            pid,
            status: None,
            tag,
            state,
        }
    }

    /// The child's OS pid, or `None` once the child has been reaped
    pub fn pid(&self) -> Option<u32> {
        (self.pid > 0).then_some(self.pid as u32)
    }

    /// The recorded exit status, once a wait has reaped the child
    pub fn exit_code(&self) -> Option<i32> {
        self.status
    }

    /// Attach an opaque tag to this handle, replacing any previous one
    pub fn set_tag(&mut self, tag: Box<dyn Any + Send>) {
        self.tag = Some(tag);
    }

    /// Borrow the attached tag, if any
    pub fn tag(&self) -> Option<&(dyn Any + Send)> {
        self.tag.as_deref()
    }

    /// Remove and return the attached tag
    pub fn take_tag(&mut self) -> Option<Box<dyn Any + Send>> {
        self.tag.take()
    }

    /// Forcibly terminate the child with SIGKILL.
    ///
    /// The child still has to be reaped by a wait afterwards. Signalling is
    /// best-effort: a child that is already gone is not a failure.
    pub fn kill(&mut self) -> Result<()> {
        debug!("Killing process {}", self.pid);
        self.signal(Signal::SIGKILL)
    }

    /// Pause the child with SIGSTOP
    pub fn suspend(&mut self) -> Result<()> {
        debug!("Suspending process {}", self.pid);
        self.signal(Signal::SIGSTOP)
    }

    /// Resume a paused child with SIGCONT
    pub fn resume(&mut self) -> Result<()> {
        debug!("Resuming process {}", self.pid);
        self.signal(Signal::SIGCONT)
    }

    fn signal(&self, sig: Signal) -> Result<()> {
        // A reaped handle has nothing left to signal
        if self.pid <= 0 {
            return Ok(());
        }
        match kill(Pid::from_raw(self.pid), sig) {
            Ok(()) => Ok(()),
            // Already gone, or beyond our credentials: best-effort delivery
            Err(Errno::ESRCH) | Err(Errno::EPERM) => Ok(()),
            Err(e) => Err(ProcError::Signal(format!(
                "kill({}, {}) failed: {}",
                self.pid, sig, e
            ))),
        }
    }

    /// Block until the child terminates and return its exit status.
    ///
    /// Returns the exit code in `[0, 255]` for a normal exit, or `-1` when
    /// the child was terminated by a signal. Idempotent: once the child has
    /// been reaped, the recorded status is returned immediately.
    pub fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.status {
            return Ok(code);
        }
        let pid = self.waitable_pid()?;
        loop {
            match waitpid(pid, None) {
                Ok(status) => {
                    if let Some(code) = terminal_code(status) {
                        self.mark_reaped(code);
                        return Ok(code);
                    }
                    // Not a termination event; keep waiting
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(ProcError::Wait(format!("waitpid({}) failed: {}", pid, e)));
                }
            }
        }
    }

    /// Probe for termination without blocking.
    ///
    /// `Ok(None)` means the child is still running.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        if let Some(code) = self.status {
            return Ok(Some(code));
        }
        let pid = self.waitable_pid()?;
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => match terminal_code(status) {
                Some(code) => {
                    self.mark_reaped(code);
                    Ok(Some(code))
                }
                None => Ok(None),
            },
            Err(Errno::EINTR) => Ok(None),
            Err(e) => Err(ProcError::Wait(format!("waitpid({}) failed: {}", pid, e))),
        }
    }

    /// Wait for termination for at most `timeout`.
    ///
    /// A zero timeout degenerates to a single non-blocking probe. `Ok(None)`
    /// means the timeout elapsed with the child still running; mechanism
    /// failures are errors, never conflated with a timeout.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<i32>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(Some(code));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    /// Wait for termination without blocking the async runtime.
    ///
    /// Yields to the runtime between probes; dropping the returned future
    /// cancels the wait and leaves the handle untouched. `timeout` of `None`
    /// waits indefinitely.
    pub async fn wait_async(&mut self, timeout: Option<Duration>) -> Result<Option<i32>> {
        if let Some(code) = self.status {
            return Ok(Some(code));
        }
        let pid = self.waitable_pid()?;
        match crate::bridge::wait_exit(pid, timeout).await? {
            Some(code) => {
                self.mark_reaped(code);
                Ok(Some(code))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn pid_raw(&self) -> libc::pid_t {
        self.pid
    }

    /// Record the terminal status and retire the pid. The pid is meaningless
    /// (and possibly recycled) from this point on.
    pub(crate) fn mark_reaped(&mut self, code: i32) {
        debug!("Process {} reaped with status {}", self.pid, code);
        self.status = Some(code);
        self.pid = 0;
    }

    fn waitable_pid(&self) -> Result<Pid> {
        if self.pid <= 0 {
            return Err(ProcError::InvalidProcess(
                "handle does not refer to a live child".to_string(),
            ));
        }
        Ok(Pid::from_raw(self.pid))
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("status", &self.status)
            .field("strategy", &self.state.strategy_name())
            .field("tag", &self.tag.as_ref().map(|_| ".."))
            .finish()
    }
}
