/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::logger
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Provide structured, append-only logging for upgrade phases
    that span several boots of the same host.

  Security / Safety Notes:
    Log lines carry package names and paths only; no state
    record contents are dumped wholesale.

  Dependencies:
    std::fs::File, std::sync::Mutex, chrono for timestamps,
    sha2 for session integrity hashing.

  Operational Scope:
    Every phase opens one logger per invocation; the offline
    upgrade phase relies on the file sink because no terminal
    is attached during that boot.

  Revision History:
    2024-11-04 COD  Established logging module.
    2025-11-12 COD  Tagged entries with the active phase.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Append-only logging with UTC timestamps
    - Deterministic formatting for auditability
    - Graceful error propagation on I/O failures
============================================================*/

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::{Result, UpgradeError};

/// Structured log level for Syn-Upgrade events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Append-only logger in Synavera format, shared by every phase.
pub struct Logger {
    file: Option<Mutex<BufWriter<File>>>,
    path: Option<PathBuf>,
    verbose: bool,
}

impl Logger {
    /// Build a logger that writes to stderr and optionally to a file.
    pub fn new(path: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let file = match path.as_deref() {
            Some(file_path) => Some(Mutex::new(BufWriter::new(open_log_file(file_path)?))),
            None => None,
        };

        Ok(Self {
            file,
            path,
            verbose,
        })
    }

    /// Logger with no file sink; only warnings and errors reach stderr.
    pub fn stderr_only() -> Self {
        Self {
            file: None,
            path: None,
            verbose: false,
        }
    }

    /// Emit a log entry with the given level, code, and message.
    pub fn log<S: AsRef<str>>(&self, level: LogLevel, code: &str, message: S) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let payload = format!(
            "{timestamp} [{}] [{}] {}",
            level.as_str(),
            code,
            message.as_ref()
        );

        if self.verbose || matches!(level, LogLevel::Error | LogLevel::Warn) {
            eprintln!("{payload}");
        }

        let Some(file) = &self.file else {
            return;
        };
        if let Ok(mut guard) = file.lock() {
            let written = writeln!(guard, "{payload}").and_then(|_| guard.flush());
            if written.is_err() {
                eprintln!(
                    "{timestamp} [{}] [LOGGER] Failed to write log entry",
                    LogLevel::Error.as_str()
                );
            }
        }
    }

    /// Convenience wrapper for `INFO` level events.
    pub fn info<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Info, code, message);
    }

    /// Convenience wrapper for `WARN` level events.
    pub fn warn<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Warn, code, message);
    }

    /// Convenience wrapper for `ERROR` level events.
    pub fn error<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Error, code, message);
    }

    /// Convenience wrapper for `DEBUG` level events.
    pub fn debug<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Debug, code, message);
    }

    /// Return the path backing this logger, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Compute and persist the SHA-256 digest of the session log.
    pub fn finalize(&self) -> Result<()> {
        let Some(path) = self.path() else {
            return Ok(());
        };
        let data = std::fs::read(path).map_err(|err| {
            UpgradeError::Filesystem(format!(
                "Failed to read log for hashing {}: {err}",
                path.display()
            ))
        })?;
        let digest = Sha256::digest(&data);
        let mut hash_os = path.as_os_str().to_os_string();
        hash_os.push(".hash");
        let hash_path = PathBuf::from(hash_os);
        let line = format!(
            "{:x}  {}\n",
            digest,
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        std::fs::write(&hash_path, line).map_err(|err| {
            UpgradeError::Filesystem(format!(
                "Failed to write hash file {}: {err}",
                hash_path.display()
            ))
        })
    }
}

fn open_log_file(file_path: &Path) -> Result<File> {
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            UpgradeError::Filesystem(format!(
                "Failed to create log directory {}: {err}",
                parent.display()
            ))
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path)
        .map_err(|err| {
            UpgradeError::Filesystem(format!(
                "Failed to open log file {}: {err}",
                file_path.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_receives_entries_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("upgrade.log");
        let logger = Logger::new(Some(path.clone()), false).unwrap();
        logger.info("INIT", "phase download");
        logger.debug("PLAN", "3 packages");
        logger.finalize().unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("[INFO] [INIT] phase download"));
        assert!(body.contains("[DEBUG] [PLAN] 3 packages"));

        let hash = std::fs::read_to_string(dir.path().join("logs").join("upgrade.log.hash")).unwrap();
        assert!(hash.trim_end().ends_with("  upgrade.log"));
        assert_eq!(hash.split_whitespace().next().unwrap().len(), 64);
    }

    #[test]
    fn finalize_without_file_is_noop() {
        assert!(Logger::stderr_only().finalize().is_ok());
    }
}
