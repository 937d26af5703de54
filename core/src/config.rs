//! Configuration loading and validation for process definitions
//!
//! This module parses a TOML configuration into `schema::SpawnSpec` values,
//! applies sane defaults (via serde defaults on schema types), and performs
//! strict validation with field-path error messages.

use crate::{ProcError, Result};
use schema::{RedirectSpec, SpawnSpec};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level TOML structure for process definitions:
///
/// [[process]]
/// command = "sh -c 'exit 0'"
/// stdout = "null"
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessesFile {
    /// List of processes to spawn
    pub process: Vec<SpawnSpec>,
}

impl ProcessesFile {
    /// Validate the configuration and return `Result<()>` with field-path errors
    pub fn validate(&self) -> Result<()> {
        if self.process.is_empty() {
            return Err(ProcError::Config(
                "process: must contain at least one entry".to_string(),
            ));
        }

        for (i, spec) in self.process.iter().enumerate() {
            if spec.command.trim().is_empty() {
                return Err(ProcError::Config(format!(
                    "process[{}].command: cannot be empty",
                    i
                )));
            }

            validate_redirect(&spec.stdout, &format!("process[{}].stdout", i))?;
            validate_redirect(&spec.stderr, &format!("process[{}].stderr", i))?;

            if let Some(env) = &spec.env {
                for key in env.keys() {
                    if key.trim().is_empty() {
                        return Err(ProcError::Config(format!(
                            "process[{}].env: keys cannot be empty",
                            i
                        )));
                    }
                    if key.contains('=') {
                        return Err(ProcError::Config(format!(
                            "process[{}].env: key '{}' cannot contain '='",
                            i, key
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

fn validate_redirect(redirect: &RedirectSpec, field: &str) -> Result<()> {
    if let RedirectSpec::Path { path, flags } = redirect {
        if path.trim().is_empty() {
            return Err(ProcError::Config(format!("{}.path: cannot be empty", field)));
        }
        // Output capture needs a writable target
        if !flags.write {
            return Err(ProcError::Config(format!(
                "{}.flags: write must be enabled for an output redirect",
                field
            )));
        }
        if flags.append && flags.truncate {
            return Err(ProcError::Config(format!(
                "{}.flags: append and truncate are mutually exclusive",
                field
            )));
        }
    }
    Ok(())
}

/// Load process definitions from a TOML file path
pub fn load_spawn_specs(path: impl AsRef<Path>) -> Result<Vec<SpawnSpec>> {
    let data = fs::read_to_string(&path).map_err(|e| {
        ProcError::Config(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    parse_spawn_specs(&data)
}

/// Parse process definitions from a TOML string
pub fn parse_spawn_specs(input: &str) -> Result<Vec<SpawnSpec>> {
    let file: ProcessesFile =
        toml::from_str(input).map_err(|e| ProcError::Config(format!("TOML parse error: {}", e)))?;
    file.validate()?;
    Ok(file.process)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::FileFlags;

    #[test]
    fn test_parse_minimal() {
        let specs = parse_spawn_specs(
            r#"
            [[process]]
            command = "echo hello"
            "#,
        )
        .unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].command, "echo hello");
        assert_eq!(specs[0].stdout, RedirectSpec::Inherit);
        assert!(!specs[0].suspended);
    }

    #[test]
    fn test_parse_full_entry() {
        let specs = parse_spawn_specs(
            r#"
            [[process]]
            command = "sh -c 'exit 7'"
            stderr = "null"
            suspended = false

            [process.stdout.path]
            path = "/tmp/out.log"
            flags = { write = true, create = true, append = true, truncate = false }

            [process.env]
            RUST_LOG = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].stderr, RedirectSpec::Null);
        match &specs[0].stdout {
            RedirectSpec::Path { path, flags } => {
                assert_eq!(path, "/tmp/out.log");
                assert!(flags.append);
                assert!(!flags.truncate);
            }
            other => panic!("expected path redirect, got {:?}", other),
        }
        assert_eq!(
            specs[0].env.as_ref().and_then(|e| e.get("RUST_LOG")),
            Some(&"debug".to_string())
        );
    }

    #[test]
    fn test_empty_file_rejected() {
        let err = parse_spawn_specs("").unwrap_err();
        assert_eq!(err.code(), "PROC009");
    }

    #[test]
    fn test_empty_command_rejected_with_field_path() {
        let err = parse_spawn_specs(
            r#"
            [[process]]
            command = "  "
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("process[0].command"));
    }

    #[test]
    fn test_non_writable_redirect_rejected() {
        let file = ProcessesFile {
            process: vec![SpawnSpec {
                command: "echo hi".to_string(),
                stdout: RedirectSpec::Path {
                    path: "/tmp/out".to_string(),
                    flags: FileFlags {
                        read: true,
                        write: false,
                        ..FileFlags::default()
                    },
                },
                stderr: RedirectSpec::Inherit,
                env: None,
                suspended: false,
            }],
        };
        let err = file.validate().unwrap_err();
        assert!(err.to_string().contains("process[0].stdout.flags"));
    }

    #[test]
    fn test_env_key_with_equals_rejected() {
        let err = parse_spawn_specs(
            r#"
            [[process]]
            command = "echo hi"
            [process.env]
            "A=B" = "1"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("process[0].env"));
    }
}
