/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::dnf
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Interface with dnf and rpm to record and fetch the target
    release's transaction, replay it with progress ticks, and
    probe the installed package-manager version.

  Security / Safety Notes:
    Commands run with the caller's privileges; the entry point
    refuses privileged phases unless running as root.

  Dependencies:
    std::process for blocking command execution, std::thread to
    drain helper stderr, semver for version comparison.

  Operational Scope:
    Host-side collaborators consumed by the workflow controller
    through the traits declared here.

  Revision History:
    2025-11-12 COD  Crafted dnf/rpm integration layer.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic command invocation with explicit checks
    - Structured parsing with clear failure modes
    - Reusable helpers for external command diagnostics
============================================================*/

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;

use semver::Version;

use crate::error::{Result, UpgradeError};
use crate::plan::{PlanEntry, TransactionPlan};
use crate::progress::{ProgressEvent, TransactionAction};

/// Options chosen for the download phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub target_release: String,
    pub distro_sync: bool,
    pub allow_erasing: bool,
}

/// Resolves the target release and fetches every package it needs.
pub trait Resolver {
    fn resolve_and_fetch(
        &mut self,
        request: &DownloadRequest,
        datadir: &Path,
    ) -> Result<TransactionPlan>;
}

/// Applies a recorded plan, reporting progress in-line.
pub trait TransactionEngine {
    fn replay(
        &mut self,
        datadir: &Path,
        plan: &TransactionPlan,
        on_progress: &mut dyn FnMut(&ProgressEvent),
    ) -> Result<()>;
}

/// Reports the installed package-manager version.
pub trait PackageManagerProbe {
    fn version(&self) -> Result<String>;
}

/// Reports the release the running system belongs to.
pub trait ReleaseProbe {
    fn system_release(&self) -> Result<String>;
}

/// Records the transaction `dnf --assumeno` resolves, then fetches its
/// payloads with `dnf --downloadonly`.
#[derive(Debug, Clone)]
pub struct DnfResolver {
    dnf_bin: String,
}

impl DnfResolver {
    pub fn new<S: Into<String>>(dnf_bin: S) -> Self {
        Self {
            dnf_bin: dnf_bin.into(),
        }
    }

    fn request_args(request: &DownloadRequest, leading: &[String]) -> Vec<String> {
        let mut args = leading.to_vec();
        args.push(format!("--releasever={}", request.target_release));
        if request.allow_erasing {
            args.push("--allowerasing".into());
        }
        let verb = if request.distro_sync {
            "distro-sync"
        } else {
            "upgrade"
        };
        args.push(verb.to_string());
        args
    }

    fn resolve(&self, request: &DownloadRequest) -> Result<Vec<ResolvedPackage>> {
        let args = Self::request_args(request, &["--assumeno".to_string()]);
        // dnf exits non-zero when --assumeno declines the transaction.
        let output = capture_command(&self.dnf_bin, &args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_transaction_table(&stdout).ok_or_else(|| UpgradeError::CommandFailure {
            command: format!("{} {}", self.dnf_bin, args.join(" ")),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl Resolver for DnfResolver {
    fn resolve_and_fetch(
        &mut self,
        request: &DownloadRequest,
        datadir: &Path,
    ) -> Result<TransactionPlan> {
        let resolved = self.resolve(request)?;
        let mut plan = TransactionPlan {
            target_release: request.target_release.clone(),
            distro_sync: request.distro_sync,
            entries: Vec::new(),
        };
        if resolved.is_empty() {
            return Ok(plan);
        }

        let leading = [
            "--assumeyes".to_string(),
            "--downloadonly".to_string(),
            format!("--destdir={}", datadir.display()),
        ];
        run_command(&self.dnf_bin, &Self::request_args(request, &leading))?;

        plan.entries = attach_payloads(resolved, &downloaded_packages(datadir)?)?;
        Ok(plan)
    }
}

/// One row of dnf's transaction table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedPackage {
    name: String,
    arch: Option<String>,
    action: TransactionAction,
}

/// Parse the table dnf prints before asking for confirmation. `None` means
/// dnf never reached a transaction summary, i.e. resolution failed.
fn parse_transaction_table(stdout: &str) -> Option<Vec<ResolvedPackage>> {
    let mut packages = Vec::new();
    let mut action: Option<TransactionAction> = None;
    let mut wrapped_name: Option<String> = None;

    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Nothing to do") {
            return Some(Vec::new());
        }
        if trimmed == "Transaction Summary" {
            return Some(packages);
        }
        if !line.starts_with(char::is_whitespace) {
            if let Some(section) = trimmed.strip_suffix(':') {
                action = section_action(section);
                wrapped_name = None;
            }
            continue;
        }
        let Some(action) = action else {
            continue;
        };
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        match tokens.as_slice() {
            [] => {}
            ["replacing", obsoleted, ..] => {
                let (name, arch) = split_name_arch(obsoleted);
                packages.push(ResolvedPackage {
                    name,
                    arch,
                    action: TransactionAction::Obsolete,
                });
            }
            // Long names wrap onto a line of their own.
            [name] => wrapped_name = Some((*name).to_string()),
            [first, rest @ ..] => {
                let (name, arch) = match wrapped_name.take() {
                    Some(name) => (name, Some((*first).to_string())),
                    None => ((*first).to_string(), rest.first().map(|arch| arch.to_string())),
                };
                packages.push(ResolvedPackage { name, arch, action });
            }
        }
    }
    None
}

fn section_action(section: &str) -> Option<TransactionAction> {
    if section.starts_with("Installing") {
        Some(TransactionAction::Install)
    } else if section.starts_with("Upgrading") {
        Some(TransactionAction::Upgrade)
    } else if section.starts_with("Downgrading") {
        Some(TransactionAction::Downgrade)
    } else if section.starts_with("Reinstalling") {
        Some(TransactionAction::Reinstall)
    } else if section.starts_with("Removing") {
        Some(TransactionAction::Remove)
    } else {
        None
    }
}

fn split_name_arch(label: &str) -> (String, Option<String>) {
    match label.rsplit_once('.') {
        Some((name, arch)) => (name.to_string(), Some(arch.to_string())),
        None => (label.to_string(), None),
    }
}

fn carries_payload(action: TransactionAction) -> bool {
    matches!(
        action,
        TransactionAction::Install
            | TransactionAction::Upgrade
            | TransactionAction::Downgrade
            | TransactionAction::Reinstall
    )
}

/// Pair every resolved package that needs a payload with the file dnf left in
/// the data directory.
fn attach_payloads(resolved: Vec<ResolvedPackage>, files: &[String]) -> Result<Vec<PlanEntry>> {
    resolved
        .into_iter()
        .map(|package| {
            let file = if carries_payload(package.action) {
                let found = files.iter().find(|file| {
                    package_name_from_file(file) == package.name
                        && package
                            .arch
                            .as_deref()
                            .map_or(true, |arch| package_arch_from_file(file) == arch)
                });
                let found = found.ok_or_else(|| {
                    UpgradeError::Transaction(format!(
                        "dnf resolved {} but did not download it",
                        package.name
                    ))
                })?;
                Some(found.clone())
            } else {
                None
            };
            Ok(PlanEntry {
                package: package.name,
                action: package.action,
                file,
            })
        })
        .collect()
}

/// Replays a plan through `rpm`: removals in one `--erase` run, then every
/// payload in a single `--upgrade` transaction whose `--percent` output
/// becomes progress ticks. Obsoleted packages go away with the upgrade.
#[derive(Debug, Clone)]
pub struct RpmEngine {
    rpm_bin: String,
}

impl RpmEngine {
    pub fn new<S: Into<String>>(rpm_bin: S) -> Self {
        Self {
            rpm_bin: rpm_bin.into(),
        }
    }
}

impl TransactionEngine for RpmEngine {
    fn replay(
        &mut self,
        datadir: &Path,
        plan: &TransactionPlan,
        on_progress: &mut dyn FnMut(&ProgressEvent),
    ) -> Result<()> {
        let total = u32::try_from(plan.len())
            .map_err(|_| UpgradeError::Transaction("plan has too many entries".into()))?;
        let mut monitor = ReplayMonitor::new(plan, total);

        if let Some(args) = erase_args(plan) {
            monitor.announce_removals(&mut *on_progress);
            // Dependencies were settled by dnf; the upgrade that follows
            // restores them.
            stream_command(&self.rpm_bin, &args, &mut |_: &str| {})?;
        }
        if let Some(args) = upgrade_args(datadir, plan)? {
            stream_command(&self.rpm_bin, &args, &mut |line: &str| {
                monitor.observe(line, &mut *on_progress)
            })?;
        }

        on_progress(&ProgressEvent {
            package: String::new(),
            action: TransactionAction::TransactionPost,
            sub_current: 1,
            sub_total: 1,
            item_index: total,
            item_total: total,
        });
        Ok(())
    }
}

/// Follows a `rpm --upgrade --percent --verbose` run: each package label
/// selects the plan entry that the `%%` lines after it belong to.
struct ReplayMonitor<'p> {
    plan: &'p TransactionPlan,
    total: u32,
    labels: HashMap<String, usize>,
    current: Option<usize>,
}

impl<'p> ReplayMonitor<'p> {
    fn new(plan: &'p TransactionPlan, total: u32) -> Self {
        let labels = plan
            .entries
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| {
                let file = entry.file.as_deref()?;
                Some((file.strip_suffix(".rpm").unwrap_or(file).to_string(), position))
            })
            .collect();
        Self {
            plan,
            total,
            labels,
            current: None,
        }
    }

    fn announce_removals(&self, on_progress: &mut dyn FnMut(&ProgressEvent)) {
        for (position, entry) in self.plan.entries.iter().enumerate() {
            if entry.action == TransactionAction::Remove {
                on_progress(&self.event(position, 0, 1));
            }
        }
    }

    fn observe(&mut self, line: &str, on_progress: &mut dyn FnMut(&ProgressEvent)) {
        if let Some(percent) = parse_percent_line(line) {
            if let Some(position) = self.current {
                on_progress(&self.event(position, percent, 100));
            }
            return;
        }
        if let Some(&position) = self.labels.get(&strip_epoch(line.trim())) {
            self.current = Some(position);
            on_progress(&self.event(position, 0, 100));
        }
    }

    fn event(&self, position: usize, sub_current: u64, sub_total: u64) -> ProgressEvent {
        let entry = &self.plan.entries[position];
        ProgressEvent {
            package: entry.package.clone(),
            action: entry.action,
            sub_current,
            sub_total,
            item_index: position as u32 + 1,
            item_total: self.total,
        }
    }
}

/// `name-E:V-R.A` as printed by rpm, without the epoch used in file names.
fn strip_epoch(label: &str) -> String {
    if let Some((head, tail)) = label.split_once(':') {
        if let Some((name, epoch)) = head.rsplit_once('-') {
            if !epoch.is_empty() && epoch.chars().all(|c| c.is_ascii_digit()) {
                return format!("{name}-{tail}");
            }
        }
    }
    label.to_string()
}

/// Queries `rpm` for the installed dnf version.
#[derive(Debug, Clone)]
pub struct RpmProbe {
    rpm_bin: String,
    package: String,
}

impl RpmProbe {
    pub fn new<S: Into<String>>(rpm_bin: S, package: S) -> Self {
        Self {
            rpm_bin: rpm_bin.into(),
            package: package.into(),
        }
    }
}

impl PackageManagerProbe for RpmProbe {
    fn version(&self) -> Result<String> {
        let args = vec![
            "-q".to_string(),
            "--queryformat".to_string(),
            "%{VERSION}".to_string(),
            self.package.clone(),
        ];
        let output = run_command(&self.rpm_bin, &args)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Reads `VERSION_ID` from an os-release file.
#[derive(Debug, Clone)]
pub struct OsRelease {
    path: PathBuf,
}

impl OsRelease {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl ReleaseProbe for OsRelease {
    fn system_release(&self) -> Result<String> {
        let raw = std::fs::read_to_string(&self.path).map_err(|err| {
            UpgradeError::Filesystem(format!("Failed to read {}: {err}", self.path.display()))
        })?;
        parse_version_id(&raw).ok_or_else(|| {
            UpgradeError::Config(format!("No VERSION_ID in {}", self.path.display()))
        })
    }
}

fn parse_version_id(raw: &str) -> Option<String> {
    raw.lines().find_map(|line| {
        let value = line.trim().strip_prefix("VERSION_ID=")?;
        let value = value.trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// True when `found` is at least `minimum`. Versions with fewer than three
/// numeric components are padded with zeros.
pub fn version_at_least(found: &str, minimum: &str) -> Result<bool> {
    Ok(lenient_version(found)? >= lenient_version(minimum)?)
}

fn lenient_version(raw: &str) -> Result<Version> {
    let mut parts: Vec<u64> = Vec::new();
    for piece in raw.trim().split('.').take(3) {
        let digits: String = piece.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            break;
        }
        let value = digits.parse::<u64>().map_err(|err| {
            UpgradeError::Serialization(format!("Unparseable version `{raw}`: {err}"))
        })?;
        parts.push(value);
    }
    if parts.is_empty() {
        return Err(UpgradeError::Serialization(format!(
            "Unparseable version `{raw}`"
        )));
    }
    parts.resize(3, 0);
    Ok(Version::new(parts[0], parts[1], parts[2]))
}

/// Parse an `rpm --percent` progress line such as `%% 42.000000`.
fn parse_percent_line(line: &str) -> Option<u64> {
    let value = line.trim().strip_prefix("%%")?.trim();
    let percent = value.parse::<f64>().ok()?;
    if percent.is_finite() && percent >= 0.0 {
        Some((percent.floor() as u64).min(100))
    } else {
        None
    }
}

fn erase_args(plan: &TransactionPlan) -> Option<Vec<String>> {
    let removals: Vec<String> = plan
        .entries
        .iter()
        .filter(|entry| entry.action == TransactionAction::Remove)
        .map(|entry| entry.package.clone())
        .collect();
    if removals.is_empty() {
        return None;
    }
    let mut args = vec!["--erase".to_string(), "--nodeps".to_string()];
    args.extend(removals);
    Some(args)
}

fn upgrade_args(datadir: &Path, plan: &TransactionPlan) -> Result<Option<Vec<String>>> {
    let mut args = vec![
        "--upgrade".to_string(),
        "--percent".to_string(),
        "--verbose".to_string(),
    ];
    let has = |action: TransactionAction| plan.entries.iter().any(|entry| entry.action == action);
    if has(TransactionAction::Downgrade) {
        args.push("--oldpackage".into());
    }
    if has(TransactionAction::Reinstall) {
        args.push("--replacepkgs".into());
    }

    let mut payloads = 0;
    for entry in plan.entries.iter().filter(|entry| carries_payload(entry.action)) {
        let file = entry.file.as_deref().ok_or_else(|| {
            UpgradeError::Transaction(format!("plan entry {} has no package file", entry.package))
        })?;
        args.push(datadir.join(file).display().to_string());
        payloads += 1;
    }
    Ok((payloads > 0).then_some(args))
}

fn downloaded_packages(datadir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(datadir).map_err(|err| {
        UpgradeError::Filesystem(format!("Failed to list {}: {err}", datadir.display()))
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.ends_with(".rpm") {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

/// Name portion of an `N-V-R.A.rpm` file name.
fn package_name_from_file(file: &str) -> &str {
    let stem = file.strip_suffix(".rpm").unwrap_or(file);
    let mut pieces = stem.rsplitn(3, '-');
    let _release = pieces.next();
    let _version = pieces.next();
    pieces.next().unwrap_or(stem)
}

/// Architecture suffix of an `N-V-R.A.rpm` file name.
fn package_arch_from_file(file: &str) -> &str {
    let stem = file.strip_suffix(".rpm").unwrap_or(file);
    stem.rsplit_once('.').map_or("", |(_, arch)| arch)
}

/// Run a helper to completion and hand back its output whatever the status.
fn capture_command(program: &str, args: &[String]) -> Result<Output> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| map_spawn_error(err, program))
}

/// Run a helper to completion, failing on a non-zero exit.
pub(crate) fn run_command(program: &str, args: &[String]) -> Result<Output> {
    let output = capture_command(program, args)?;
    if !output.status.success() {
        return Err(UpgradeError::CommandFailure {
            command: format!("{program} {}", args.join(" ")),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Run a helper, handing each stdout line to `on_line` as it arrives. Stderr
/// is drained on its own thread so scriptlet noise cannot fill the pipe, and
/// the child is always reaped.
fn stream_command(program: &str, args: &[String], on_line: &mut dyn FnMut(&str)) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| map_spawn_error(err, program))?;

    let stderr_drain = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut captured = Vec::new();
            let _ = stderr.read_to_end(&mut captured);
            captured
        })
    });
    let read = match child.stdout.take() {
        Some(stdout) => read_lines_lossy(stdout, on_line),
        None => Ok(()),
    };
    if read.is_err() {
        let _ = child.kill();
    }
    let status = child.wait()?;
    let stderr = stderr_drain
        .and_then(|drain| drain.join().ok())
        .unwrap_or_default();

    read.map_err(|err| UpgradeError::Runtime(format!("Failed to read {program} output: {err}")))?;
    if !status.success() {
        return Err(UpgradeError::Transaction(format!(
            "{program} {} failed with status {}: {}",
            args.first().map(String::as_str).unwrap_or_default(),
            status.code().unwrap_or(-1),
            stderr_tail(&stderr)
        )));
    }
    Ok(())
}

fn read_lines_lossy<T: Read>(source: T, on_line: &mut dyn FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(source);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        on_line(String::from_utf8_lossy(&line).trim_end_matches(|c| c == '\n' || c == '\r'));
    }
}

const STDERR_TAIL_CHARS: usize = 2048;

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    text.chars().skip(skip).collect()
}

pub(crate) fn map_spawn_error(err: io::Error, command: &str) -> UpgradeError {
    if err.kind() == io::ErrorKind::NotFound {
        UpgradeError::CommandMissing {
            command: command.into(),
        }
    } else {
        UpgradeError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}
