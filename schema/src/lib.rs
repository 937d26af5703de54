//! Schema definitions for Procyon
//!
//! This crate contains shared data structures used across the Procyon
//! process library. All types here implement JSON Schema generation for
//! external consumption (configuration tooling, editors, IPC peers).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;


/// Open-mode flags applied when a child's stdout/stderr is redirected to a
/// file path.
///
/// The default mode is write + create + truncate, which is what callers
/// almost always want for capturing output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileFlags {
    /// Open for reading
    #[serde(default)]
    pub read: bool,
    /// Open for writing
    #[serde(default = "default_true")]
    pub write: bool,
    /// Create the file if it does not exist
    #[serde(default = "default_true")]
    pub create: bool,
    /// Append instead of overwriting
    #[serde(default)]
    pub append: bool,
    /// Truncate existing contents
    #[serde(default = "default_true")]
    pub truncate: bool,
}

impl Default for FileFlags {
    fn default() -> Self {
        Self {
            read: false,
            write: true,
            create: true,
            append: false,
            truncate: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Serializable redirection choice for one of the child's output streams.
///
/// Redirection to an already-open descriptor is runtime-only state and is
/// therefore not representable here; see `procyon_core::Redirect` for the
/// full set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RedirectSpec {
    /// Inherit the parent's stream
    #[default]
    Inherit,
    /// Discard all output (redirect to the null device)
    Null,
    /// Redirect to a file path, opened with the given flags
    Path {
        /// Target file path
        path: String,
        /// Open-mode flags for the target
        #[serde(default)]
        flags: FileFlags,
    },
}

/// One completion record produced by a batch wait.
///
/// Records are emitted in the order the OS reports terminations, which is
/// not the order handles were submitted; `index` is the only way to map a
/// record back to its handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WaitInfo {
    /// Position of the corresponding handle in the caller-supplied list
    pub index: usize,
    /// OS process id that was reaped
    pub pid: u32,
    /// Exit code in [0,255], or -1 if the process did not exit normally
    pub status: i32,
}

/// A declarative description of one spawn, suitable for configuration files.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpawnSpec {
    /// Single command string, tokenized with shell-like quoting rules
    pub command: String,
    /// Redirection for standard output
    #[serde(default)]
    pub stdout: RedirectSpec,
    /// Redirection for standard error
    #[serde(default)]
    pub stderr: RedirectSpec,
    /// Replacement environment; absent means inherit the current environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Start the child in a suspended state (platform support required)
    #[serde(default)]
    pub suspended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::schema_for;

    #[test]
    fn test_file_flags_default() {
        let flags = FileFlags::default();
        assert!(flags.write);
        assert!(flags.create);
        assert!(flags.truncate);
        assert!(!flags.read);
        assert!(!flags.append);
    }

    #[test]
    fn test_redirect_spec_default_is_inherit() {
        assert_eq!(RedirectSpec::default(), RedirectSpec::Inherit);
    }

    #[test]
    fn test_spawn_spec_defaults_from_minimal_json() {
        let spec: SpawnSpec = serde_json::from_str(r#"{"command": "echo hi"}"#).unwrap();
        assert_eq!(spec.command, "echo hi");
        assert_eq!(spec.stdout, RedirectSpec::Inherit);
        assert_eq!(spec.stderr, RedirectSpec::Inherit);
        assert!(spec.env.is_none());
        assert!(!spec.suspended);
    }

    #[test]
    fn test_schema_generation() {
        // Just check that schemas can be generated without panicking
        let _flags_schema = schema_for!(FileFlags);
        let _redirect_schema = schema_for!(RedirectSpec);
        let _wait_info_schema = schema_for!(WaitInfo);
        let _spawn_spec_schema = schema_for!(SpawnSpec);
    }
}
