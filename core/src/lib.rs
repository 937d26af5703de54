//! Core functionality for the Procyon process library
//!
//! This crate provides cross-platform process-lifecycle primitives: spawning
//! a child program with controllable stdout/stderr redirection, waiting for
//! its termination (blocking, polling, or cooperatively on an async runtime),
//! batch-waiting across a set of outstanding children, signalling a running
//! child, and tokenizing a single command string into an argument vector with
//! shell-like quoting semantics.

pub mod config;
pub mod error;
pub mod tokenize;

#[cfg(unix)]
pub mod process;

#[cfg(unix)]
pub(crate) mod bridge;

#[cfg(test)]
mod error_tests;

// Re-export schema types for convenience
pub use schema::*;

pub use error::{ProcError, Result};
pub use tokenize::{tokenize, CommandLine};

#[cfg(unix)]
pub use process::{
    default_strategy, wait_list, ForkExecStrategy, PosixSpawnStrategy, Process, Redirect,
    SpawnOptions, SpawnStrategy,
};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::ProcError::Config(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_init_tracing_is_not_reentrant() {
            // First call may fail if another test won the race to install a
            // global subscriber, but a second one must fail either way
            let _ = init_tracing("debug");
            let second = init_tracing("debug");
            assert_eq!(second.unwrap_err().code(), "PROC009");
        }
    }
}
