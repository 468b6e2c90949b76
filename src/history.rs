/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::history
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Keep an append-only journal of offline upgrade attempts and
    render it for the `log` phase.

  Security / Safety Notes:
    Journal entries hold release identifiers, counts and error
    text only.

  Dependencies:
    serde_json for one JSON document per line.

  Operational Scope:
    Appended by the offline upgrade phase; read by `log`. The
    journal survives `clean` so past upgrades stay visible.

  Revision History:
    2025-11-12 COD  Authored upgrade history journal.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Append-only persistence
    - Malformed lines skipped, never fatal
============================================================*/

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpgradeError};

/// Final result of an upgrade attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Complete,
    Failed,
}

/// One offline upgrade attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub started_at: String,
    pub finished_at: String,
    pub from_release: Option<String>,
    pub to_release: Option<String>,
    pub packages: usize,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append `record` as a single line to the journal at `path`.
pub fn append(path: &Path, record: &HistoryRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            UpgradeError::Filesystem(format!(
                "Failed to create history directory {}: {err}",
                parent.display()
            ))
        })?;
    }
    let line = serde_json::to_string(record)
        .map_err(|err| UpgradeError::Serialization(format!("Failed to encode history: {err}")))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| {
            UpgradeError::Filesystem(format!("Failed to open history {}: {err}", path.display()))
        })?;
    writeln!(file, "{line}").map_err(|err| {
        UpgradeError::Filesystem(format!("Failed to append history {}: {err}", path.display()))
    })
}

/// Journal contents plus the number of lines that failed to parse.
#[derive(Debug, Default)]
pub struct History {
    pub records: Vec<HistoryRecord>,
    pub skipped: usize,
}

/// Read the journal. A missing journal is an empty history.
pub fn load(path: &Path) -> Result<History> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(History::default()),
        Err(err) => {
            return Err(UpgradeError::Filesystem(format!(
                "Failed to read history {}: {err}",
                path.display()
            )))
        }
    };

    let mut history = History::default();
    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<HistoryRecord>(line) {
            Ok(record) => history.records.push(record),
            Err(_) => history.skipped += 1,
        }
    }
    Ok(history)
}

/// One line per attempt, numbered from 1 in journal order.
pub fn render_list(records: &[HistoryRecord]) -> String {
    if records.is_empty() {
        return "No upgrade attempts recorded.\n".to_string();
    }
    let mut out = String::new();
    for (index, record) in records.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}  {}  {} -> {}  {:<8}  {} packages",
            index + 1,
            record.started_at,
            record.from_release.as_deref().unwrap_or("?"),
            record.to_release.as_deref().unwrap_or("?"),
            outcome_label(record.outcome),
            record.packages
        );
    }
    out
}

/// Full detail for attempt `number` (1-based).
pub fn render_one(records: &[HistoryRecord], number: usize) -> Result<String> {
    let record = number
        .checked_sub(1)
        .and_then(|index| records.get(index))
        .ok_or_else(|| {
            UpgradeError::precondition(format!(
                "No upgrade attempt #{number}; {} recorded",
                records.len()
            ))
        })?;

    let mut out = String::new();
    let _ = writeln!(out, "Attempt:   #{number}");
    let _ = writeln!(out, "Started:   {}", record.started_at);
    let _ = writeln!(out, "Finished:  {}", record.finished_at);
    let _ = writeln!(
        out,
        "Releases:  {} -> {}",
        record.from_release.as_deref().unwrap_or("?"),
        record.to_release.as_deref().unwrap_or("?")
    );
    let _ = writeln!(out, "Packages:  {}", record.packages);
    let _ = writeln!(out, "Outcome:   {}", outcome_label(record.outcome));
    if let Some(error) = &record.error {
        let _ = writeln!(out, "Error:     {error}");
    }
    Ok(out)
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Complete => "complete",
        Outcome::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: Outcome, error: Option<&str>) -> HistoryRecord {
        HistoryRecord {
            started_at: "2025-11-12T08:00:00Z".into(),
            finished_at: "2025-11-12T08:41:07Z".into(),
            from_release: Some("41".into()),
            to_release: Some("42".into()),
            packages: 1432,
            outcome,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn append_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("var").join("history.jsonl");
        append(&path, &record(Outcome::Failed, Some("rpm exited 1"))).unwrap();
        append(&path, &record(Outcome::Complete, None)).unwrap();

        let history = load(&path).unwrap();
        assert_eq!(history.records.len(), 2);
        assert_eq!(history.records[0].outcome, Outcome::Failed);
        assert_eq!(history.records[1].outcome, Outcome::Complete);
        assert_eq!(history.skipped, 0);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        append(&path, &record(Outcome::Complete, None)).unwrap();
        let mut raw = fs::read_to_string(&path).unwrap();
        raw.push_str("{not json\n");
        fs::write(&path, raw).unwrap();

        let history = load(&path).unwrap();
        assert_eq!(history.records.len(), 1);
        assert_eq!(history.skipped, 1);
    }

    #[test]
    fn missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = load(&dir.path().join("absent.jsonl")).unwrap();
        assert!(history.records.is_empty());
        assert_eq!(render_list(&history.records), "No upgrade attempts recorded.\n");
    }

    #[test]
    fn render_one_shows_error_and_rejects_bad_numbers() {
        let records = vec![record(Outcome::Failed, Some("rpm exited 1"))];
        let detail = render_one(&records, 1).unwrap();
        assert!(detail.contains("Outcome:   failed"));
        assert!(detail.contains("Error:     rpm exited 1"));
        assert!(render_one(&records, 0).is_err());
        assert!(render_one(&records, 2).is_err());
    }

    #[test]
    fn render_list_numbers_from_one() {
        let records = vec![record(Outcome::Complete, None)];
        let listing = render_list(&records);
        assert!(listing.starts_with("  1  2025-11-12T08:00:00Z  41 -> 42  complete"));
    }
}
