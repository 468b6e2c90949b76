/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::plan
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Record the transaction resolved at download time so the
    offline phase replays exactly that transaction.

  Security / Safety Notes:
    The plan digest is stored in the state record; a plan that
    changed after download is refused before replay.

  Dependencies:
    serde_json for the plan document, sha2 for its digest.

  Operational Scope:
    Written by the download phase into the data directory and
    read back by the offline upgrade phase.

  Revision History:
    2025-11-12 COD  Authored transaction plan document.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic ordering of transaction entries
    - Integrity check between phases
============================================================*/

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, UpgradeError};
use crate::progress::TransactionAction;

pub const PLAN_FILE: &str = "plan.json";

/// Ordered list of operations the offline phase will apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPlan {
    pub target_release: String,
    pub distro_sync: bool,
    pub entries: Vec<PlanEntry>,
}

/// One package operation. `file` names the downloaded payload inside the
/// data directory; removals carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub package: String,
    pub action: TransactionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl TransactionPlan {
    pub fn path_in(datadir: &Path) -> PathBuf {
        datadir.join(PLAN_FILE)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the plan into `datadir` and return its hex digest.
    pub fn write(&self, datadir: &Path) -> Result<String> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|err| UpgradeError::Serialization(format!("Failed to encode plan: {err}")))?;
        let path = Self::path_in(datadir);
        std::fs::write(&path, &bytes).map_err(|err| {
            UpgradeError::Filesystem(format!("Failed to write plan {}: {err}", path.display()))
        })?;
        Ok(digest_hex(&bytes))
    }

    /// Load the plan from `datadir`, refusing it when its digest no longer
    /// matches the one recorded at download time.
    pub fn load_verified(datadir: &Path, expected_digest: Option<&str>) -> Result<Self> {
        let path = Self::path_in(datadir);
        let bytes = std::fs::read(&path).map_err(|err| {
            UpgradeError::precondition(format!(
                "Transaction plan {} is unavailable ({err}); run `download` again",
                path.display()
            ))
        })?;

        if let Some(expected) = expected_digest {
            let actual = digest_hex(&bytes);
            if actual != expected {
                return Err(UpgradeError::precondition(format!(
                    "Transaction plan {} changed since download (expected {expected}, found {actual}); run `download` again",
                    path.display()
                )));
            }
        }

        serde_json::from_slice(&bytes).map_err(|err| {
            UpgradeError::Serialization(format!("Failed to parse plan {}: {err}", path.display()))
        })
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
