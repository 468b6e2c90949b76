/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::config
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Load operator configuration describing where upgrade state,
    packages, history and logs live, and which helper binaries
    drive the host.

  Security / Safety Notes:
    Configuration is read from root-owned locations first; the
    per-user fallback only applies when no system file exists.

  Dependencies:
    serde and toml for parsing, dirs for the user config root.

  Operational Scope:
    Read once per invocation by the entry point before any
    phase is configured.

  Revision History:
    2025-11-12 COD  Authored configuration loader.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Every key carries a documented default
    - Explicit failure on malformed operator input
============================================================*/

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, UpgradeError};

const SYSTEM_CONFIG_PATH: &str = "/etc/synupgrade/config.toml";

/// Runtime configuration for Syn-Upgrade.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpgradeConfig {
    /// Persistent state record.
    pub state_path: PathBuf,
    /// Directory receiving downloaded packages and the transaction plan.
    pub datadir: PathBuf,
    /// JSON-lines journal of upgrade attempts.
    pub history_path: PathBuf,
    pub log_dir: PathBuf,
    /// Symlink whose presence triggers the offline upgrade boot.
    pub boot_hook_path: PathBuf,
    pub os_release_path: PathBuf,
    pub min_package_manager_version: String,
    pub plymouth_bin: String,
    pub dnf_bin: String,
    pub rpm_bin: String,
    pub systemctl_bin: String,
    /// Plymouth mode selected while the offline transaction runs.
    pub splash_mode: String,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("/var/lib/synupgrade/state.toml"),
            datadir: PathBuf::from("/var/lib/synupgrade/packages"),
            history_path: PathBuf::from("/var/lib/synupgrade/history.jsonl"),
            log_dir: PathBuf::from("/var/log/synupgrade"),
            boot_hook_path: PathBuf::from("/system-update"),
            os_release_path: PathBuf::from("/etc/os-release"),
            min_package_manager_version: "1.1.0".into(),
            plymouth_bin: "plymouth".into(),
            dnf_bin: "dnf".into(),
            rpm_bin: "rpm".into(),
            systemctl_bin: "systemctl".into(),
            splash_mode: "updates".into(),
        }
    }
}

impl UpgradeConfig {
    /// Load from an explicit path, or fall back through the system and
    /// user locations to built-in defaults.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }
        for candidate in default_candidates() {
            if candidate.is_file() {
                return Self::load_from_path(&candidate);
            }
        }
        Ok(Self::default())
    }

    /// Parse a TOML configuration file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            UpgradeError::Config(format!("Failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
            .map_err(|err| UpgradeError::Config(format!("{}: {err}", path.display())))
    }

    fn from_toml_str(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

fn default_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("synupgrade").join("config.toml"));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = UpgradeConfig::from_toml_str("").unwrap();
        assert_eq!(config.boot_hook_path, PathBuf::from("/system-update"));
        assert_eq!(config.min_package_manager_version, "1.1.0");
        assert_eq!(config.splash_mode, "updates");
    }

    #[test]
    fn overrides_merge_with_defaults() {
        let config = UpgradeConfig::from_toml_str(
            "datadir = \"/srv/upgrade\"\nplymouth_bin = \"/usr/bin/plymouth\"\n",
        )
        .unwrap();
        assert_eq!(config.datadir, PathBuf::from("/srv/upgrade"));
        assert_eq!(config.plymouth_bin, "/usr/bin/plymouth");
        assert_eq!(config.rpm_bin, "rpm");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "datadri = \"/tmp\"\n").unwrap();
        let err = UpgradeConfig::load_from_path(&path).unwrap_err();
        assert!(matches!(err, UpgradeError::Config(_)));
    }
}
