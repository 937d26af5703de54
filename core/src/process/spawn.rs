//! Spawn strategies: declarative posix_spawn and fork/exec
//!
//! Two interchangeable implementations of one process-creation contract,
//! selected once by platform capability (see [`default_strategy`]). The
//! declarative strategy builds a file-action list and an attributes object
//! that the OS applies *during* process creation, so there is no window in
//! which the child runs with the parent's descriptors unmodified. The
//! fork/exec strategy duplicates the calling process and applies
//! redirections in the child before replacing its image.

// Process creation requires raw libc calls on both strategies
#![allow(unsafe_code)]

use crate::{ProcError, Result};
use schema::{FileFlags, RedirectSpec, SpawnSpec};
use std::any::Any;
use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use tracing::{debug, error};

use super::Process;

/// Redirection for one of the child's output streams.
#[derive(Debug, Default)]
pub enum Redirect {
    /// Inherit the parent's stream
    #[default]
    Inherit,
    /// Discard output via the null device
    Null,
    /// Open a file path onto the stream with the given flags
    Path {
        /// Target file path
        path: PathBuf,
        /// Open-mode flags for the target
        flags: FileFlags,
    },
    /// Duplicate an already-open descriptor onto the stream.
    ///
    /// The descriptor is consumed: once the child holds its own duplicate,
    /// the parent's copy is closed and must not be reused.
    Fd(OwnedFd),
}

impl From<&RedirectSpec> for Redirect {
    fn from(spec: &RedirectSpec) -> Self {
        match spec {
            RedirectSpec::Inherit => Redirect::Inherit,
            RedirectSpec::Null => Redirect::Null,
            RedirectSpec::Path { path, flags } => Redirect::Path {
                path: PathBuf::from(path),
                flags: *flags,
            },
        }
    }
}

/// Configuration for one spawn. A value object: consumed by the spawn call
/// and not retained afterwards.
#[derive(Default)]
pub struct SpawnOptions {
    /// Redirection for standard output
    pub stdout: Redirect,
    /// Redirection for standard error
    pub stderr: Redirect,
    /// Replacement environment; `None` inherits the current environment
    pub env: Option<Vec<(String, String)>>,
    /// Start the child in a suspended state (declarative strategy on Apple
    /// platforms only)
    pub suspended: bool,
    /// Opaque tag attached to the resulting handle, never interpreted
    pub tag: Option<Box<dyn Any + Send>>,
}

impl SpawnOptions {
    /// Options with everything inherited and no tag
    pub fn new() -> Self {
        Self::default()
    }

    /// Build runtime options from a serializable [`SpawnSpec`]
    pub fn from_spec(spec: &SpawnSpec) -> Self {
        Self {
            stdout: Redirect::from(&spec.stdout),
            stderr: Redirect::from(&spec.stderr),
            env: spec
                .env
                .as_ref()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            suspended: spec.suspended,
            tag: None,
        }
    }

    /// Set the stdout redirection
    pub fn stdout(mut self, redirect: Redirect) -> Self {
        self.stdout = redirect;
        self
    }

    /// Set the stderr redirection
    pub fn stderr(mut self, redirect: Redirect) -> Self {
        self.stderr = redirect;
        self
    }

    /// Replace the child's environment
    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = Some(env);
        self
    }

    /// Request a suspended start
    pub fn suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }

    /// Attach an opaque tag to the resulting handle
    pub fn tag(mut self, tag: Box<dyn Any + Send>) -> Self {
        self.tag = Some(tag);
        self
    }
}

/// A spawn strategy: one of the two interchangeable process-creation
/// backends. `Process::spawn` uses [`default_strategy`]; tests and callers
/// with special needs may pick one explicitly via `Process::spawn_with`.
pub trait SpawnStrategy: Send + Sync {
    /// Strategy name, used in logs
    fn name(&self) -> &'static str;

    /// Create a child process running `program`.
    ///
    /// `args` is the full argument vector; its first element is
    /// conventionally the program itself. An empty `args` is treated as
    /// `[program]`.
    fn spawn(&self, program: &str, args: &[&str], options: SpawnOptions) -> Result<Process>;
}

/// The strategy used by `Process::spawn`, chosen by platform capability.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub fn default_strategy() -> &'static dyn SpawnStrategy {
    &PosixSpawnStrategy
}

/// The strategy used by `Process::spawn`, chosen by platform capability.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
pub fn default_strategy() -> &'static dyn SpawnStrategy {
    &ForkExecStrategy
}

/// Backend-specific teardown state carried by a process handle, keyed by
/// the strategy that produced it.
pub(crate) enum BackendState {
    /// Spawn attributes and file actions; destroyed when the handle drops
    Declarative {
        _attrs: SpawnAttrs,
        _actions: FileActions,
    },
    /// fork/exec leaves nothing to tear down
    ForkExec,
}

impl BackendState {
    pub(crate) fn strategy_name(&self) -> &'static str {
        match self {
            BackendState::Declarative { .. } => "posix_spawn",
            BackendState::ForkExec => "fork_exec",
        }
    }
}

/// Owned `posix_spawnattr_t`, destroyed on drop
pub(crate) struct SpawnAttrs(libc::posix_spawnattr_t);

impl SpawnAttrs {
    fn new() -> Result<Self> {
        let mut attrs = MaybeUninit::uninit();
        let rc = unsafe { libc::posix_spawnattr_init(attrs.as_mut_ptr()) };
        if rc != 0 {
            return Err(spawn_err(rc, "posix_spawnattr_init failed"));
        }
        Ok(Self(unsafe { attrs.assume_init() }))
    }

    fn as_mut_ptr(&mut self) -> *mut libc::posix_spawnattr_t {
        &mut self.0
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.0
    }
}

impl Drop for SpawnAttrs {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.0);
        }
    }
}

// The attribute object is owned exclusively by one handle
unsafe impl Send for SpawnAttrs {}

/// Owned `posix_spawn_file_actions_t`, destroyed on drop
pub(crate) struct FileActions(libc::posix_spawn_file_actions_t);

impl FileActions {
    fn new() -> Result<Self> {
        let mut actions = MaybeUninit::uninit();
        let rc = unsafe { libc::posix_spawn_file_actions_init(actions.as_mut_ptr()) };
        if rc != 0 {
            return Err(spawn_err(rc, "posix_spawn_file_actions_init failed"));
        }
        Ok(Self(unsafe { actions.assume_init() }))
    }

    fn add_open(&mut self, fd: RawFd, path: &CStr, oflag: libc::c_int, mode: libc::mode_t) -> Result<()> {
        let rc = unsafe {
            libc::posix_spawn_file_actions_addopen(&mut self.0, fd, path.as_ptr(), oflag, mode)
        };
        if rc != 0 {
            return Err(ProcError::Redirect(format!(
                "cannot add open action for fd {}: os error {}",
                fd, rc
            )));
        }
        Ok(())
    }

    fn add_dup2(&mut self, src: RawFd, dst: RawFd) -> Result<()> {
        let rc = unsafe { libc::posix_spawn_file_actions_adddup2(&mut self.0, src, dst) };
        if rc != 0 {
            return Err(ProcError::Redirect(format!(
                "cannot add dup2 action {} -> {}: os error {}",
                src, dst, rc
            )));
        }
        Ok(())
    }

    fn add_close(&mut self, fd: RawFd) -> Result<()> {
        let rc = unsafe { libc::posix_spawn_file_actions_addclose(&mut self.0, fd) };
        if rc != 0 {
            return Err(ProcError::Redirect(format!(
                "cannot add close action for fd {}: os error {}",
                fd, rc
            )));
        }
        Ok(())
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.0
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&mut self.0);
        }
    }
}

// The file-action list is owned exclusively by one handle
unsafe impl Send for FileActions {}

/// Declarative strategy: one atomic spawn call with OS-applied file actions.
pub struct PosixSpawnStrategy;

impl SpawnStrategy for PosixSpawnStrategy {
    fn name(&self) -> &'static str {
        "posix_spawn"
    }

    fn spawn(&self, program: &str, args: &[&str], options: SpawnOptions) -> Result<Process> {
        debug!("Spawning process via posix_spawn: {} {:?}", program, args);

        let prog_c = arg_cstring(program)?;
        let argv_c = build_argv(&prog_c, args)?;
        let mut argv_ptrs = nul_terminated(&argv_c);

        let env_c = match &options.env {
            Some(pairs) => joined_env(pairs)?,
            None => inherited_env(),
        };
        let mut env_ptrs = nul_terminated(&env_c);

        #[cfg_attr(not(target_os = "macos"), allow(unused_mut))]
        let mut attrs = SpawnAttrs::new()?;
        let mut actions = FileActions::new()?;

        add_redirect(&mut actions, libc::STDOUT_FILENO, &options.stdout)?;
        add_redirect(&mut actions, libc::STDERR_FILENO, &options.stderr)?;

        if options.suspended {
            #[cfg(target_os = "macos")]
            {
                // From <spawn.h>; libc does not export this Apple extension
                const POSIX_SPAWN_START_SUSPENDED: libc::c_short = 0x0080;
                let rc = unsafe {
                    libc::posix_spawnattr_setflags(attrs.as_mut_ptr(), POSIX_SPAWN_START_SUSPENDED)
                };
                if rc != 0 {
                    return Err(spawn_err(rc, "cannot request suspended start"));
                }
            }
            #[cfg(not(target_os = "macos"))]
            {
                return Err(ProcError::Unsupported(
                    "suspended start requires POSIX_SPAWN_START_SUSPENDED".to_string(),
                ));
            }
        }

        let mut pid: libc::pid_t = 0;
        let rc = unsafe {
            libc::posix_spawnp(
                &mut pid,
                prog_c.as_ptr(),
                actions.as_ptr(),
                attrs.as_ptr(),
                argv_ptrs.as_mut_ptr(),
                env_ptrs.as_mut_ptr(),
            )
        };
        if rc != 0 {
            error!("posix_spawnp of '{}' failed: os error {}", program, rc);
            return Err(spawn_err(rc, format!("cannot spawn '{}'", program)));
        }
        if pid <= 0 {
            return Err(ProcError::Spawn {
                errno: 0,
                message: format!("backend returned non-positive pid {}", pid),
            });
        }

        debug!("Successfully spawned process {} via posix_spawn", pid);
        Ok(Process::from_spawn(
            pid,
            BackendState::Declarative {
                _attrs: attrs,
                _actions: actions,
            },
            options.tag,
        ))
        // `options` drops here, closing any consumed redirect descriptors:
        // the child already owns its duplicates
    }
}

/// Fallback strategy: duplicate the calling process, redirect in the child,
/// then replace its image.
pub struct ForkExecStrategy;

impl SpawnStrategy for ForkExecStrategy {
    fn name(&self) -> &'static str {
        "fork_exec"
    }

    fn spawn(&self, program: &str, args: &[&str], options: SpawnOptions) -> Result<Process> {
        use nix::unistd::{fork, ForkResult};

        debug!("Spawning process via fork/exec: {} {:?}", program, args);

        if options.suspended {
            return Err(ProcError::Unsupported(
                "suspended start is not supported by the fork/exec strategy".to_string(),
            ));
        }

        // Everything the child touches is prepared before the fork so the
        // child only performs async-signal-safe calls
        let prog_c = arg_cstring(program)?;
        let argv_c = build_argv(&prog_c, args)?;
        let env = match &options.env {
            Some(pairs) => Some(ChildEnv::prepare(pairs)?),
            None => None,
        };
        let out = PreparedRedirect::prepare(&options.stdout)?;
        let err = PreparedRedirect::prepare(&options.stderr)?;

        let pid = match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                if out.apply(libc::STDOUT_FILENO).is_err() {
                    unsafe { libc::_exit(255) };
                }
                if err.apply(libc::STDERR_FILENO).is_err() {
                    unsafe { libc::_exit(255) };
                }
                exec_child(&prog_c, &argv_c, env.as_ref())
            }
            Ok(ForkResult::Parent { child }) => child.as_raw(),
            Err(e) => {
                error!("fork for '{}' failed: {}", program, e);
                return Err(spawn_err(e as i32, format!("cannot fork for '{}'", program)));
            }
        };

        if pid <= 0 {
            return Err(ProcError::Spawn {
                errno: 0,
                message: format!("fork returned non-positive pid {}", pid),
            });
        }

        debug!("Successfully spawned process {} via fork/exec", pid);
        Ok(Process::from_spawn(pid, BackendState::ForkExec, options.tag))
        // parent copies of consumed redirect descriptors close with `options`
    }
}

/// Child-side redirection, resolved to raw pieces before the fork
enum PreparedRedirect {
    None,
    Open {
        path: CString,
        oflag: libc::c_int,
        mode: libc::mode_t,
    },
    Dup(RawFd),
}

impl PreparedRedirect {
    fn prepare(redirect: &Redirect) -> Result<Self> {
        Ok(match redirect {
            Redirect::Inherit => PreparedRedirect::None,
            Redirect::Null => PreparedRedirect::Open {
                path: CString::new("/dev/null").map_err(|_| {
                    ProcError::Redirect("null device path contains NUL".to_string())
                })?,
                oflag: libc::O_WRONLY,
                mode: 0,
            },
            Redirect::Path { path, flags } => PreparedRedirect::Open {
                path: CString::new(path.as_os_str().as_bytes()).map_err(|_| {
                    ProcError::Redirect(format!(
                        "redirect path contains an interior NUL byte: {}",
                        path.display()
                    ))
                })?,
                oflag: open_flags(flags),
                mode: open_mode(flags),
            },
            Redirect::Fd(fd) => PreparedRedirect::Dup(fd.as_raw_fd()),
        })
    }

    /// Apply in the child: async-signal-safe calls only.
    fn apply(&self, target: libc::c_int) -> std::result::Result<(), ()> {
        let src = match self {
            PreparedRedirect::None => return Ok(()),
            PreparedRedirect::Open { path, oflag, mode } => {
                let fd = unsafe { libc::open(path.as_ptr(), *oflag, *mode as libc::c_uint) };
                if fd < 0 {
                    return Err(());
                }
                fd
            }
            PreparedRedirect::Dup(fd) => *fd,
        };
        if unsafe { libc::dup2(src, target) } < 0 {
            return Err(());
        }
        unsafe { libc::close(src) };
        Ok(())
    }
}

/// Replacement environment in both forms the child-side exec may need
#[allow(dead_code)]
struct ChildEnv {
    /// `name=value` strings for exec variants that take an environment
    joined: Vec<CString>,
    /// Split pairs for the entry-by-entry fallback
    pairs: Vec<(CString, CString)>,
}

impl ChildEnv {
    fn prepare(env: &[(String, String)]) -> Result<Self> {
        let joined = joined_env(env)?;
        let mut pairs = Vec::with_capacity(env.len());
        for (name, value) in env {
            pairs.push((arg_cstring(name)?, arg_cstring(value)?));
        }
        Ok(Self { joined, pairs })
    }
}

/// Replace the child image. Never returns: a failed exec terminates the
/// child copy so it cannot fall back into the parent's code path.
fn exec_child(prog: &CStr, argv: &[CString], env: Option<&ChildEnv>) -> ! {
    match env {
        None => {
            let _ = nix::unistd::execvp(prog, argv);
        }
        Some(env) => {
            #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
            let _ = nix::unistd::execvpe(prog, argv, &env.joined);

            #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
            {
                // No exec-with-environment variant here. The duplicated
                // address space is private to this child, so writing the
                // replacement environment entry-by-entry cannot touch the
                // parent's environment store.
                for (name, value) in &env.pairs {
                    unsafe { libc::setenv(name.as_ptr(), value.as_ptr(), 1) };
                }
                let _ = nix::unistd::execvp(prog, argv);
            }
        }
    }
    unsafe { libc::_exit(255) }
}

fn add_redirect(actions: &mut FileActions, target: RawFd, redirect: &Redirect) -> Result<()> {
    match redirect {
        Redirect::Inherit => Ok(()),
        Redirect::Null => {
            let null = CString::new("/dev/null")
                .map_err(|_| ProcError::Redirect("null device path contains NUL".to_string()))?;
            actions.add_open(target, &null, libc::O_WRONLY, 0)
        }
        Redirect::Path { path, flags } => {
            let path_c = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
                ProcError::Redirect(format!(
                    "redirect path contains an interior NUL byte: {}",
                    path.display()
                ))
            })?;
            actions.add_open(target, &path_c, open_flags(flags), open_mode(flags))
        }
        Redirect::Fd(fd) => {
            // Duplicate onto the stream in the child, then close the
            // child's copy of the original
            actions.add_dup2(fd.as_raw_fd(), target)?;
            actions.add_close(fd.as_raw_fd())
        }
    }
}

fn open_flags(flags: &FileFlags) -> libc::c_int {
    let mut bits = if flags.read && flags.write {
        libc::O_RDWR
    } else if flags.read {
        libc::O_RDONLY
    } else {
        libc::O_WRONLY
    };
    if flags.create {
        bits |= libc::O_CREAT;
    }
    if flags.append {
        bits |= libc::O_APPEND;
    }
    if flags.truncate {
        bits |= libc::O_TRUNC;
    }
    bits
}

fn open_mode(flags: &FileFlags) -> libc::mode_t {
    if flags.create {
        0o777
    } else {
        0
    }
}

fn spawn_err(errno: libc::c_int, message: impl Into<String>) -> ProcError {
    ProcError::Spawn {
        errno: errno as i32,
        message: message.into(),
    }
}

fn arg_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| ProcError::Spawn {
        errno: libc::EINVAL,
        message: format!("argument contains an interior NUL byte: {:?}", s),
    })
}

fn build_argv(prog: &CString, args: &[&str]) -> Result<Vec<CString>> {
    if args.is_empty() {
        return Ok(vec![prog.clone()]);
    }
    args.iter().map(|a| arg_cstring(a)).collect()
}

fn joined_env(pairs: &[(String, String)]) -> Result<Vec<CString>> {
    pairs
        .iter()
        .map(|(name, value)| arg_cstring(&format!("{}={}", name, value)))
        .collect()
}

/// The current environment as `name=value` strings, for inheritance under
/// the declarative strategy. Entries that cannot be represented are skipped.
fn inherited_env() -> Vec<CString> {
    std::env::vars_os()
        .filter_map(|(name, value)| {
            let mut bytes = Vec::with_capacity(name.len() + value.len() + 1);
            bytes.extend_from_slice(name.as_bytes());
            bytes.push(b'=');
            bytes.extend_from_slice(value.as_bytes());
            CString::new(bytes).ok()
        })
        .collect()
}

/// Raw pointer array for the C ABI, with the trailing null terminator
fn nul_terminated(strings: &[CString]) -> Vec<*mut libc::c_char> {
    let mut ptrs: Vec<*mut libc::c_char> = strings
        .iter()
        .map(|s| s.as_ptr() as *mut libc::c_char)
        .collect();
    ptrs.push(std::ptr::null_mut());
    ptrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_default_is_write_create_trunc() {
        let flags = FileFlags::default();
        let bits = open_flags(&flags);
        assert_eq!(bits & libc::O_ACCMODE, libc::O_WRONLY);
        assert_ne!(bits & libc::O_CREAT, 0);
        assert_ne!(bits & libc::O_TRUNC, 0);
        assert_eq!(bits & libc::O_APPEND, 0);
        assert_eq!(open_mode(&flags), 0o777);
    }

    #[test]
    fn test_open_flags_append() {
        let flags = FileFlags {
            append: true,
            truncate: false,
            ..FileFlags::default()
        };
        let bits = open_flags(&flags);
        assert_ne!(bits & libc::O_APPEND, 0);
        assert_eq!(bits & libc::O_TRUNC, 0);
    }

    #[test]
    fn test_options_from_spec() {
        let spec = SpawnSpec {
            command: "echo hi".to_string(),
            stdout: RedirectSpec::Null,
            stderr: RedirectSpec::Path {
                path: "/tmp/err.log".to_string(),
                flags: FileFlags::default(),
            },
            env: Some(
                [("A".to_string(), "1".to_string())]
                    .into_iter()
                    .collect(),
            ),
            suspended: false,
        };
        let options = SpawnOptions::from_spec(&spec);
        assert!(matches!(options.stdout, Redirect::Null));
        assert!(matches!(options.stderr, Redirect::Path { .. }));
        assert_eq!(
            options.env.as_deref(),
            Some(&[("A".to_string(), "1".to_string())][..])
        );
        assert!(!options.suspended);
    }

    #[test]
    fn test_build_argv_defaults_to_program() {
        let prog = CString::new("echo").unwrap();
        let argv = build_argv(&prog, &[]).unwrap();
        assert_eq!(argv, vec![CString::new("echo").unwrap()]);
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        let err = arg_cstring("a\0b").unwrap_err();
        assert_eq!(err.code(), "PROC001");
        assert_eq!(err.os_error(), Some(libc::EINVAL));
    }
}
