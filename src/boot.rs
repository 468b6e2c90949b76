/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::boot
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Arm and disarm the one-shot offline-update boot and request
    the reboot that enters it.

  Security / Safety Notes:
    The hook is a symlink at a root-owned path; it is consumed
    at the start of the offline phase so a failing transaction
    cannot trap the host in a boot loop.

  Dependencies:
    std::os::unix for symlinks, systemctl for reboots.

  Operational Scope:
    Used by the reboot, upgrade and clean phases.

  Revision History:
    2025-11-12 COD  Authored boot hook control.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Idempotent hook removal
    - Explicit failure on reboot requests
============================================================*/

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::dnf::run_command;
use crate::error::{Result, UpgradeError};

/// One-shot boot mechanism for the offline upgrade.
pub trait BootControl {
    /// True when a hook (dangling or not) is already in place.
    fn hook_pending(&self) -> bool;
    fn register_one_shot_boot(&mut self, target: &Path) -> Result<()>;
    /// Remove the hook; absence is not an error.
    fn remove_hook(&mut self) -> Result<()>;
    fn reboot(&mut self) -> Result<()>;
}

/// systemd offline-update convention: a `/system-update` symlink pointing at
/// the data directory.
#[derive(Debug, Clone)]
pub struct MagicSymlinkBoot {
    hook_path: PathBuf,
    systemctl_bin: String,
}

impl MagicSymlinkBoot {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(hook_path: P, systemctl_bin: S) -> Self {
        Self {
            hook_path: hook_path.into(),
            systemctl_bin: systemctl_bin.into(),
        }
    }
}

impl BootControl for MagicSymlinkBoot {
    fn hook_pending(&self) -> bool {
        fs::symlink_metadata(&self.hook_path).is_ok()
    }

    fn register_one_shot_boot(&mut self, target: &Path) -> Result<()> {
        std::os::unix::fs::symlink(target, &self.hook_path).map_err(|err| {
            UpgradeError::Filesystem(format!(
                "Failed to create boot hook {} -> {}: {err}",
                self.hook_path.display(),
                target.display()
            ))
        })
    }

    fn remove_hook(&mut self) -> Result<()> {
        match fs::remove_file(&self.hook_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UpgradeError::Filesystem(format!(
                "Failed to remove boot hook {}: {err}",
                self.hook_path.display()
            ))),
        }
    }

    fn reboot(&mut self) -> Result<()> {
        run_command(&self.systemctl_bin, &["reboot".to_string()]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let hook = dir.path().join("system-update");
        let mut boot = MagicSymlinkBoot::new(&hook, "systemctl");

        assert!(!boot.hook_pending());
        boot.register_one_shot_boot(&dir.path().join("packages"))
            .unwrap();
        // dangling link still counts as pending
        assert!(boot.hook_pending());
        assert!(boot.register_one_shot_boot(dir.path()).is_err());

        boot.remove_hook().unwrap();
        assert!(!boot.hook_pending());
        boot.remove_hook().unwrap();
    }
}
