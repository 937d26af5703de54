//! Core error types and utilities

use thiserror::Error;

/// Errors produced by the Procyon process primitives
#[derive(Error, Debug)]
pub enum ProcError {
    /// The spawn backend reported a failure; carries the underlying OS error code
    #[error("Spawn error (os error {errno}): {message}")]
    Spawn {
        /// Raw OS error code reported by the backend
        errno: i32,
        /// Human-readable context
        message: String,
    },

    #[error("Redirect error: {0}")]
    Redirect(String),

    #[error("Invalid process: {0}")]
    InvalidProcess(String),

    #[error("Wait error: {0}")]
    Wait(String),

    #[error("Signal error: {0}")]
    Signal(String),

    #[error("Too many arguments: {0}")]
    TooManyArguments(String),

    #[error("Command overflow: {0}")]
    Overflow(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            ProcError::Spawn { .. } => "PROC001",
            ProcError::Redirect(_) => "PROC002",
            ProcError::InvalidProcess(_) => "PROC003",
            ProcError::Wait(_) => "PROC004",
            ProcError::Signal(_) => "PROC005",
            ProcError::TooManyArguments(_) => "PROC006",
            ProcError::Overflow(_) => "PROC007",
            ProcError::Unsupported(_) => "PROC008",
            ProcError::Config(_) => "PROC009",
            ProcError::Io(_) => "PROC010",
        }
    }

    /// The underlying OS error code, when one was captured
    pub fn os_error(&self) -> Option<i32> {
        match self {
            ProcError::Spawn { errno, .. } => Some(*errno),
            ProcError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, ProcError>;
