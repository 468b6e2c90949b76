/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::error
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise Syn-Upgrade error types to provide consistent
    diagnostics and exit semantics across upgrade phases.

  Security / Safety Notes:
    Error contexts expose only high-level paths and command
    names; package payloads are never echoed.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Used across modules to propagate recoverable failures and
    consolidate exit codes for the binary entry point.

  Revision History:
    2024-11-04 COD  Established shared error definitions.
    2025-11-12 COD  Split phase-gate failures from state misuse.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - No silent failure paths
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::process::ExitCode;

use thiserror::Error;

/// Result alias for Syn-Upgrade operations.
pub type Result<T> = std::result::Result<T, UpgradeError>;

/// Enumerates high-level error domains surfaced by Syn-Upgrade.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("{0}")]
    Precondition(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Required command `{command}` not found in PATH")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Transaction: {0}")]
    Transaction(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error("Unknown state field `{0}`")]
    UnknownStateField(String),
    #[error("Invalid value for state field `{field}`: {reason}")]
    InvalidStateValue { field: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl UpgradeError {
    /// Shorthand for a user-facing phase-gate failure.
    pub fn precondition<S: Into<String>>(message: S) -> Self {
        UpgradeError::Precondition(message.into())
    }

    /// True for failures caused by misuse of internal helpers rather than
    /// the host environment.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            UpgradeError::UnknownStateField(_) | UpgradeError::InvalidStateValue { .. }
        )
    }

    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            UpgradeError::Precondition(_) => ExitCode::from(1),
            UpgradeError::PermissionDenied(_) => ExitCode::from(4),
            UpgradeError::CommandMissing { .. } => ExitCode::from(10),
            UpgradeError::CommandFailure { .. } => ExitCode::from(11),
            UpgradeError::Config(_) => ExitCode::from(20),
            UpgradeError::Serialization(_) => ExitCode::from(31),
            UpgradeError::Filesystem(_) => ExitCode::from(40),
            UpgradeError::Io(_) => ExitCode::from(41),
            UpgradeError::Transaction(_) => ExitCode::from(45),
            UpgradeError::Runtime(_) => ExitCode::from(50),
            UpgradeError::UnknownStateField(_) | UpgradeError::InvalidStateValue { .. } => {
                ExitCode::from(70)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_misuse_is_a_programming_error() {
        assert!(UpgradeError::UnknownStateField("datadri".into()).is_programming_error());
        assert!(UpgradeError::InvalidStateValue {
            field: "distro_sync".into(),
            reason: "expected boolean".into(),
        }
        .is_programming_error());
        assert!(!UpgradeError::precondition("run download first").is_programming_error());
    }

    #[test]
    fn precondition_renders_message_verbatim() {
        let err = UpgradeError::precondition("system is not ready for upgrade");
        assert_eq!(err.to_string(), "system is not ready for upgrade");
    }
}
