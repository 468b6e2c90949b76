/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::state
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Persist the upgrade phase record across process exits and
    reboots, with scoped all-or-nothing write transactions.

  Security / Safety Notes:
    Records are replaced via write-temp-then-rename so a crash
    never leaves a half-written file under the real name.

  Dependencies:
    serde and toml for the flat on-disk record.

  Operational Scope:
    Single source of truth for which phase the host is in and
    which options were chosen at download time.

  Revision History:
    2025-11-12 COD  Authored persistent state store.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Atomic persistence with explicit transaction scope
    - Corrupt input degrades to an empty record
    - Typo-proof field access
============================================================*/

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpgradeError};

/// Progress of the package download phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Requested,
    Complete,
}

/// Progress of the offline transaction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeStatus {
    Ready,
    Complete,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Requested => "requested",
            DownloadStatus::Complete => "complete",
        }
    }
}

impl UpgradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UpgradeStatus::Ready => "ready",
            UpgradeStatus::Complete => "complete",
        }
    }
}

/// The fixed set of fields a state record may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    DownloadStatus,
    UpgradeStatus,
    Datadir,
    TargetRelease,
    SystemRelease,
    DistroSync,
    AllowErasing,
    PlanDigest,
    UpgradeAttempted,
    PackagesTotal,
}

impl StateField {
    pub const ALL: [StateField; 10] = [
        StateField::DownloadStatus,
        StateField::UpgradeStatus,
        StateField::Datadir,
        StateField::TargetRelease,
        StateField::SystemRelease,
        StateField::DistroSync,
        StateField::AllowErasing,
        StateField::PlanDigest,
        StateField::UpgradeAttempted,
        StateField::PackagesTotal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StateField::DownloadStatus => "download_status",
            StateField::UpgradeStatus => "upgrade_status",
            StateField::Datadir => "datadir",
            StateField::TargetRelease => "target_release",
            StateField::SystemRelease => "system_release",
            StateField::DistroSync => "distro_sync",
            StateField::AllowErasing => "allow_erasing",
            StateField::PlanDigest => "plan_digest",
            StateField::UpgradeAttempted => "upgrade_attempted",
            StateField::PackagesTotal => "packages_total",
        }
    }
}

impl FromStr for StateField {
    type Err = UpgradeError;

    fn from_str(name: &str) -> Result<Self> {
        StateField::ALL
            .into_iter()
            .find(|field| field.as_str() == name)
            .ok_or_else(|| UpgradeError::UnknownStateField(name.to_string()))
    }
}

/// A scalar read from or written to the record. Unset fields read as `Null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValue {
    Null,
    Bool(bool),
    Str(String),
    Int(i64),
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => f.write_str("(unset)"),
            StateValue::Bool(value) => write!(f, "{value}"),
            StateValue::Str(value) => f.write_str(value),
            StateValue::Int(value) => write!(f, "{value}"),
        }
    }
}

/// Flat on-disk record. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_status: Option<DownloadStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_status: Option<UpgradeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datadir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distro_sync: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_erasing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_attempted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages_total: Option<i64>,
}

impl StateRecord {
    /// Read a field as a dynamic scalar.
    pub fn get(&self, field: StateField) -> StateValue {
        fn text<S: AsRef<str>>(value: Option<S>) -> StateValue {
            value.map_or(StateValue::Null, |v| StateValue::Str(v.as_ref().to_string()))
        }
        fn flag(value: Option<bool>) -> StateValue {
            value.map_or(StateValue::Null, StateValue::Bool)
        }

        match field {
            StateField::DownloadStatus => text(self.download_status.map(DownloadStatus::as_str)),
            StateField::UpgradeStatus => text(self.upgrade_status.map(UpgradeStatus::as_str)),
            StateField::Datadir => text(
                self.datadir
                    .as_ref()
                    .map(|path| path.to_string_lossy().into_owned()),
            ),
            StateField::TargetRelease => text(self.target_release.as_deref()),
            StateField::SystemRelease => text(self.system_release.as_deref()),
            StateField::DistroSync => flag(self.distro_sync),
            StateField::AllowErasing => flag(self.allow_erasing),
            StateField::PlanDigest => text(self.plan_digest.as_deref()),
            StateField::UpgradeAttempted => flag(self.upgrade_attempted),
            StateField::PackagesTotal => self
                .packages_total
                .map_or(StateValue::Null, StateValue::Int),
        }
    }

    /// Write a field from a dynamic scalar; `Null` unsets it.
    pub fn set(&mut self, field: StateField, value: StateValue) -> Result<()> {
        let invalid = |reason: &str| UpgradeError::InvalidStateValue {
            field: field.as_str().to_string(),
            reason: reason.to_string(),
        };

        match field {
            StateField::DownloadStatus => {
                self.download_status = match expect_str(value).map_err(|_| invalid("expected string"))? {
                    None => None,
                    Some(raw) => Some(match raw.as_str() {
                        "requested" => DownloadStatus::Requested,
                        "complete" => DownloadStatus::Complete,
                        _ => return Err(invalid("expected `requested` or `complete`")),
                    }),
                };
            }
            StateField::UpgradeStatus => {
                self.upgrade_status = match expect_str(value).map_err(|_| invalid("expected string"))? {
                    None => None,
                    Some(raw) => Some(match raw.as_str() {
                        "ready" => UpgradeStatus::Ready,
                        "complete" => UpgradeStatus::Complete,
                        _ => return Err(invalid("expected `ready` or `complete`")),
                    }),
                };
            }
            StateField::Datadir => {
                self.datadir = expect_str(value)
                    .map_err(|_| invalid("expected path string"))?
                    .map(PathBuf::from);
            }
            StateField::TargetRelease => {
                self.target_release = expect_str(value).map_err(|_| invalid("expected string"))?;
            }
            StateField::SystemRelease => {
                self.system_release = expect_str(value).map_err(|_| invalid("expected string"))?;
            }
            StateField::PlanDigest => {
                self.plan_digest = expect_str(value).map_err(|_| invalid("expected string"))?;
            }
            StateField::DistroSync => {
                self.distro_sync = expect_bool(value).map_err(|_| invalid("expected boolean"))?;
            }
            StateField::AllowErasing => {
                self.allow_erasing = expect_bool(value).map_err(|_| invalid("expected boolean"))?;
            }
            StateField::UpgradeAttempted => {
                self.upgrade_attempted =
                    expect_bool(value).map_err(|_| invalid("expected boolean"))?;
            }
            StateField::PackagesTotal => {
                self.packages_total = match value {
                    StateValue::Null => None,
                    StateValue::Int(count) => Some(count),
                    _ => return Err(invalid("expected integer")),
                };
            }
        }
        Ok(())
    }
}

fn expect_str(value: StateValue) -> std::result::Result<Option<String>, ()> {
    match value {
        StateValue::Null => Ok(None),
        StateValue::Str(raw) => Ok(Some(raw)),
        _ => Err(()),
    }
}

fn expect_bool(value: StateValue) -> std::result::Result<Option<bool>, ()> {
    match value {
        StateValue::Null => Ok(None),
        StateValue::Bool(flag) => Ok(Some(flag)),
        _ => Err(()),
    }
}

/// Handle on the persistent record stored at a fixed path.
#[derive(Debug)]
pub struct State {
    path: PathBuf,
    record: StateRecord,
    load_warning: Option<String>,
}

impl State {
    /// Load the record at `path`. Missing, unreadable or corrupt files yield
    /// an empty record; the reason is kept in [`State::load_warning`].
    pub fn open<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let (record, load_warning) = match fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str::<StateRecord>(&raw) {
                Ok(record) => (record, None),
                Err(err) => (
                    StateRecord::default(),
                    Some(format!("Ignoring corrupt state file {}: {err}", path.display())),
                ),
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => (StateRecord::default(), None),
            Err(err) => (
                StateRecord::default(),
                Some(format!("Ignoring unreadable state file {}: {err}", path.display())),
            ),
        };

        Self {
            path,
            record,
            load_warning,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    pub fn record(&self) -> &StateRecord {
        &self.record
    }

    /// Read a field by name. Names outside the fixed set are rejected.
    pub fn get(&self, name: &str) -> Result<StateValue> {
        Ok(self.record.get(name.parse::<StateField>()?))
    }

    pub fn download_status(&self) -> Option<DownloadStatus> {
        self.record.download_status
    }

    pub fn upgrade_status(&self) -> Option<UpgradeStatus> {
        self.record.upgrade_status
    }

    pub fn datadir(&self) -> Option<&Path> {
        self.record.datadir.as_deref()
    }

    pub fn target_release(&self) -> Option<&str> {
        self.record.target_release.as_deref()
    }

    pub fn distro_sync(&self) -> bool {
        self.record.distro_sync.unwrap_or(false)
    }

    /// Run `apply` against a staged copy of the record. When it returns `Ok`
    /// the whole record is persisted atomically and becomes current; when it
    /// returns `Err` nothing is written and the current record stands.
    pub fn write<F>(&mut self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut StateRecord) -> Result<()>,
    {
        let mut staged = self.record.clone();
        apply(&mut staged)?;
        persist(&self.path, &staged)?;
        self.record = staged;
        Ok(())
    }

    /// Remove the backing file, empty the data directory and reset every
    /// field.
    pub fn clear(&mut self) -> Result<()> {
        if let Some(datadir) = self.record.datadir.as_deref() {
            clear_dir(datadir).map_err(|err| {
                UpgradeError::Filesystem(format!(
                    "Failed to clear data directory {}: {err}",
                    datadir.display()
                ))
            })?;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(UpgradeError::Filesystem(format!(
                    "Failed to remove state file {}: {err}",
                    self.path.display()
                )))
            }
        }
        self.record = StateRecord::default();
        Ok(())
    }
}

fn persist(path: &Path, record: &StateRecord) -> Result<()> {
    let body = toml::to_string(record)
        .map_err(|err| UpgradeError::Serialization(format!("Failed to encode state: {err}")))?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| {
        UpgradeError::Filesystem(format!(
            "Failed to create state directory {}: {err}",
            parent.display()
        ))
    })?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".tmp.{}", std::process::id()));
    let tmp_path = parent.join(tmp_name);

    let written = write_synced(&tmp_path, body.as_bytes()).and_then(|_| fs::rename(&tmp_path, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(UpgradeError::Filesystem(format!(
            "Failed to write state file {}: {err}",
            path.display()
        )));
    }

    // Make the rename itself durable.
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Remove everything inside `path` while keeping `path` itself. A missing
/// directory is not an error.
pub fn clear_dir(path: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let entry_path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&entry_path)?;
        } else {
            fs::remove_file(&entry_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_in(dir: &Path) -> State {
        State::open(dir.join("state.toml"))
    }

    #[test]
    fn set_write_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());
        state
            .write(|record| {
                record.datadir = Some(PathBuf::from("/some/stupid/path"));
                Ok(())
            })
            .unwrap();
        drop(state);

        let state = state_in(dir.path());
        assert_eq!(state.datadir(), Some(Path::new("/some/stupid/path")));
    }

    #[test]
    fn bool_and_integer_values_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());
        state
            .write(|record| {
                record.set(StateField::DistroSync, StateValue::Bool(true))?;
                record.set(StateField::PackagesTotal, StateValue::Int(1432))?;
                record.set(StateField::DownloadStatus, StateValue::Str("complete".into()))
            })
            .unwrap();

        let state = state_in(dir.path());
        assert_eq!(state.get("distro_sync").unwrap(), StateValue::Bool(true));
        assert_eq!(state.get("packages_total").unwrap(), StateValue::Int(1432));
        assert_eq!(state.download_status(), Some(DownloadStatus::Complete));
    }

    #[test]
    fn unset_fields_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        for field in StateField::ALL {
            assert_eq!(state.get(field.as_str()).unwrap(), StateValue::Null);
        }
        assert!(!state.distro_sync());
        assert!(state.load_warning().is_none());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let err = state.get("DOES_NOT_EXIST").unwrap_err();
        assert!(matches!(err, UpgradeError::UnknownStateField(ref name) if name == "DOES_NOT_EXIST"));
        assert!(err.is_programming_error());
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let mut record = StateRecord::default();
        let err = record
            .set(StateField::DistroSync, StateValue::Str("yes".into()))
            .unwrap_err();
        assert!(matches!(err, UpgradeError::InvalidStateValue { .. }));
        let err = record
            .set(StateField::UpgradeStatus, StateValue::Str("halfway".into()))
            .unwrap_err();
        assert!(err.is_programming_error());
    }

    #[test]
    fn failed_scope_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());
        state
            .write(|record| {
                record.target_release = Some("41".into());
                Ok(())
            })
            .unwrap();
        let before = fs::read(state.path()).unwrap();

        let result = state.write(|record| {
            record.target_release = Some("42".into());
            record.upgrade_status = Some(UpgradeStatus::Ready);
            Err(UpgradeError::Runtime("interrupted".into()))
        });
        assert!(result.is_err());
        assert_eq!(fs::read(state.path()).unwrap(), before);
        assert_eq!(state.target_release(), Some("41"));
        assert_eq!(state.upgrade_status(), None);
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());
        state
            .write(|record| {
                record.plan_digest = Some("abc".into());
                Ok(())
            })
            .unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("state.toml")]);
    }

    #[test]
    fn clear_resets_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let datadir = dir.path().join("packages");
        fs::create_dir_all(datadir.join("nested")).unwrap();
        fs::write(datadir.join("fake.rpm"), "hi i am an rpm").unwrap();

        let mut state = state_in(dir.path());
        state
            .write(|record| {
                record.datadir = Some(datadir.clone());
                record.download_status = Some(DownloadStatus::Complete);
                Ok(())
            })
            .unwrap();
        state.clear().unwrap();
        assert!(!state.path().exists());

        let state = state_in(dir.path());
        for field in StateField::ALL {
            assert_eq!(state.get(field.as_str()).unwrap(), StateValue::Null);
        }
        assert!(datadir.is_dir());
        assert_eq!(fs::read_dir(&datadir).unwrap().count(), 0);
    }

    #[test]
    fn clear_tolerates_missing_file_and_datadir() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());
        state.clear().unwrap();
        assert!(clear_dir(&dir.path().join("never-created")).is_ok());
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "download_status = [[[").unwrap();
        let state = State::open(&path);
        assert_eq!(state.download_status(), None);
        assert!(state.load_warning().unwrap().contains("corrupt"));
    }

    #[test]
    fn clear_dir_empties_nested_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("dir1")).unwrap();
        fs::create_dir_all(dir.path().join("dir2")).unwrap();
        fs::write(dir.path().join("file1"), "hi there\n").unwrap();
        fs::write(dir.path().join("dir2").join("file2"), "hi there\n").unwrap();

        clear_dir(dir.path()).unwrap();
        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
