/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::upgrade
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Phase-gated workflow controller: download, reboot, offline
    upgrade, log and clean, each split into a configure step
    that validates preconditions and a run step that acts.

  Security / Safety Notes:
    Configure steps fail before any privileged resource is
    touched, so operators can re-run a phase to learn why it is
    blocked. An interrupted transaction is never resumed.

  Dependencies:
    chrono for history timestamps; crate collaborators for the
    host side.

  Operational Scope:
    One action per process invocation; invocations across
    reboots meet only through the persistent state record.

  Revision History:
    2025-11-12 COD  Authored upgrade workflow controller.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Exhaustive action table checked at compile time
    - Fail fast on phase-order violations
    - Cosmetic splash failures never block the upgrade
============================================================*/

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};

use crate::boot::BootControl;
use crate::config::UpgradeConfig;
use crate::dnf::{
    version_at_least, DownloadRequest, PackageManagerProbe, ReleaseProbe, Resolver,
    TransactionEngine,
};
use crate::error::{Result, UpgradeError};
use crate::history::{self, HistoryRecord, Outcome};
use crate::logger::Logger;
use crate::plan::TransactionPlan;
use crate::plymouth::{CommandRunner, PlymouthOutput};
use crate::progress::{ProgressEvent, TransactionProgress};
use crate::state::{
    clear_dir, DownloadStatus, State, StateField, StateValue, UpgradeStatus,
};

/// The commands the workflow understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Download,
    Reboot,
    Upgrade,
    Log,
    Clean,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Download,
        Action::Reboot,
        Action::Upgrade,
        Action::Log,
        Action::Clean,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::Download => "download",
            Action::Reboot => "reboot",
            Action::Upgrade => "upgrade",
            Action::Log => "log",
            Action::Clean => "clean",
        }
    }

    /// Configure/run pair implementing this action.
    pub fn phase<R: CommandRunner>(self) -> Phase<R> {
        match self {
            Action::Download => Phase {
                configure: SystemUpgrade::configure_download,
                run: SystemUpgrade::run_download,
            },
            Action::Reboot => Phase {
                configure: SystemUpgrade::configure_reboot,
                run: SystemUpgrade::run_reboot,
            },
            Action::Upgrade => Phase {
                configure: SystemUpgrade::configure_upgrade,
                run: SystemUpgrade::run_upgrade,
            },
            Action::Log => Phase {
                configure: SystemUpgrade::configure_log,
                run: SystemUpgrade::run_log,
            },
            Action::Clean => Phase {
                configure: SystemUpgrade::configure_clean,
                run: SystemUpgrade::run_clean,
            },
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = UpgradeError;

    fn from_str(name: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|action| action.name() == name)
            .ok_or_else(|| UpgradeError::precondition(format!("Unknown action `{name}`")))
    }
}

pub type ConfigureFn<R> = fn(&mut SystemUpgrade<R>, &ActionOptions) -> Result<Demands>;
pub type RunFn<R> = fn(&mut SystemUpgrade<R>, &ActionOptions) -> Result<()>;

/// Step pair for one action.
pub struct Phase<R: CommandRunner> {
    pub configure: ConfigureFn<R>,
    pub run: RunFn<R>,
}

/// What a configured phase needs from the environment before it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Demands {
    pub root_user: bool,
    /// Attach the boot splash for the duration of the run step.
    pub splash: bool,
}

/// Flags collected from the command line, shared by every action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOptions {
    pub releasever: Option<String>,
    pub distro_sync: bool,
    pub allow_erasing: bool,
    pub allow_same_release: bool,
    pub no_reboot: bool,
    pub number: Option<usize>,
}

/// Host collaborators the controller drives.
pub struct Backends {
    pub resolver: Box<dyn Resolver>,
    pub engine: Box<dyn TransactionEngine>,
    pub boot: Box<dyn BootControl>,
    pub package_manager: Box<dyn PackageManagerProbe>,
    pub release: Box<dyn ReleaseProbe>,
}

/// The upgrade workflow over one persistent state record.
pub struct SystemUpgrade<R: CommandRunner> {
    config: UpgradeConfig,
    state: State,
    backends: Backends,
    plymouth: PlymouthOutput<R>,
    logger: Logger,
}

impl<R: CommandRunner> SystemUpgrade<R> {
    pub fn new(
        config: UpgradeConfig,
        backends: Backends,
        plymouth: PlymouthOutput<R>,
        logger: Logger,
    ) -> Self {
        let state = State::open(&config.state_path);
        if let Some(warning) = state.load_warning() {
            logger.warn("STATE", warning);
        }
        Self {
            config,
            state,
            backends,
            plymouth,
            logger,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn plymouth(&self) -> &PlymouthOutput<R> {
        &self.plymouth
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Configure `action`, enforce its demands, then run it.
    pub fn execute(&mut self, action: Action, options: &ActionOptions, is_root: bool) -> Result<()> {
        let phase = action.phase::<R>();
        let demands = (phase.configure)(self, options)?;
        if demands.root_user && !is_root {
            return Err(UpgradeError::PermissionDenied(format!(
                "`{action}` must be run as root"
            )));
        }
        self.logger.info("PHASE", format!("Running {action}"));
        for field in StateField::ALL {
            self.logger.debug(
                "STATE",
                format!("{} = {}", field.as_str(), self.state.record().get(field)),
            );
        }
        if demands.splash {
            self.attach_splash();
        }
        (phase.run)(self, options)
    }

    fn attach_splash(&mut self) {
        if self.plymouth.ping() {
            self.plymouth.set_mode(&self.config.splash_mode);
        } else {
            self.logger
                .debug("SPLASH", "Plymouth unavailable; continuing without splash");
        }
    }

    // download

    pub fn configure_download(&mut self, options: &ActionOptions) -> Result<Demands> {
        let target = options.releasever.as_deref().ok_or_else(|| {
            UpgradeError::precondition("`download` requires --releasever <VERSION>")
        })?;

        match self.backends.release.system_release() {
            Ok(current) if current == target && !options.allow_same_release => {
                return Err(UpgradeError::precondition(format!(
                    "System is already on release {current}; pass --allow-same-release to refresh it"
                )));
            }
            Ok(_) => {}
            Err(err) => self
                .logger
                .warn("RELEASE", format!("Could not determine system release: {err}")),
        }

        Ok(Demands {
            root_user: true,
            splash: false,
        })
    }

    pub fn run_download(&mut self, options: &ActionOptions) -> Result<()> {
        let request = DownloadRequest {
            target_release: options.releasever.clone().ok_or_else(|| {
                UpgradeError::precondition("`download` requires --releasever <VERSION>")
            })?,
            distro_sync: options.distro_sync,
            allow_erasing: options.allow_erasing,
        };
        let datadir = self.config.datadir.clone();
        if self.backends.boot.hook_pending() {
            self.backends.boot.remove_hook()?;
            self.logger.info(
                "DOWNLOAD",
                "Cancelled the offline upgrade scheduled for the previous download",
            );
        }
        prepare_datadir(&datadir)?;

        self.state.write(|record| {
            record.download_status = Some(DownloadStatus::Requested);
            record.upgrade_status = None;
            record.upgrade_attempted = None;
            record.plan_digest = None;
            record.datadir = Some(datadir.clone());
            Ok(())
        })?;

        self.logger.info(
            "DOWNLOAD",
            format!(
                "Fetching release {} into {}",
                request.target_release,
                datadir.display()
            ),
        );
        let plan = self.backends.resolver.resolve_and_fetch(&request, &datadir)?;
        if plan.is_empty() {
            return Err(UpgradeError::precondition(format!(
                "Nothing to upgrade for release {}",
                request.target_release
            )));
        }
        let digest = plan.write(&datadir)?;
        let system_release = self.backends.release.system_release().ok();
        let packages = i64::try_from(plan.len()).unwrap_or(i64::MAX);

        self.state.write(|record| {
            record.download_status = Some(DownloadStatus::Complete);
            record.target_release = Some(request.target_release.clone());
            record.system_release = system_release;
            record.distro_sync = Some(request.distro_sync);
            record.allow_erasing = Some(request.allow_erasing);
            record.plan_digest = Some(digest);
            record.set(StateField::PackagesTotal, StateValue::Int(packages))
        })?;

        self.logger.info(
            "DOWNLOAD",
            format!("Download complete: {} packages staged", plan.len()),
        );
        println!("Download complete! Use `synupgrade reboot` to start the upgrade.");
        Ok(())
    }

    // reboot

    pub fn configure_reboot(&mut self, _options: &ActionOptions) -> Result<Demands> {
        self.check_reboot()?;
        Ok(Demands {
            root_user: true,
            splash: false,
        })
    }

    /// Gate for the reboot phase: download finished and never attempted, no
    /// hook armed, and a package manager new enough to drive the offline
    /// transaction.
    pub fn check_reboot(&self) -> Result<()> {
        if self.state.download_status() != Some(DownloadStatus::Complete) {
            return Err(UpgradeError::precondition(
                "System is not ready for upgrade; run `download` first",
            ));
        }
        if self.state.record().upgrade_attempted == Some(true) {
            return Err(UpgradeError::precondition(
                "A previous upgrade attempt did not finish; run `clean` and `download` again",
            ));
        }
        if self.backends.boot.hook_pending() {
            return Err(UpgradeError::precondition(format!(
                "An offline upgrade is already scheduled ({} exists); run `clean` to cancel it",
                self.config.boot_hook_path.display()
            )));
        }
        self.check_package_manager_version()
    }

    fn check_package_manager_version(&self) -> Result<()> {
        let found = self.backends.package_manager.version()?;
        let minimum = &self.config.min_package_manager_version;
        if !version_at_least(&found, minimum)? {
            return Err(UpgradeError::precondition(format!(
                "Package manager {found} is too old; version {minimum} or newer is required"
            )));
        }
        Ok(())
    }

    pub fn run_reboot(&mut self, options: &ActionOptions) -> Result<()> {
        let datadir = self.state_datadir()?;
        self.backends.boot.register_one_shot_boot(&datadir)?;
        let armed = self.state.write(|record| {
            record.upgrade_status = Some(UpgradeStatus::Ready);
            Ok(())
        });
        if let Err(err) = armed {
            // A hook without a ready state would boot into a refused upgrade.
            if let Err(undo) = self.backends.boot.remove_hook() {
                self.logger
                    .error("REBOOT", format!("Failed to remove boot hook: {undo}"));
            }
            return Err(err);
        }
        self.logger.info(
            "REBOOT",
            format!(
                "Offline upgrade to release {} armed for next boot (distro-sync: {})",
                self.state.target_release().unwrap_or("?"),
                self.state.distro_sync()
            ),
        );

        if options.no_reboot {
            println!("Upgrade scheduled; it will run on the next boot.");
            return Ok(());
        }
        self.backends.boot.reboot()
    }

    // upgrade

    pub fn configure_upgrade(&mut self, _options: &ActionOptions) -> Result<Demands> {
        if self.state.upgrade_status() != Some(UpgradeStatus::Ready) {
            return Err(UpgradeError::precondition(
                "No upgrade is prepared; use `reboot` to start the upgrade",
            ));
        }
        if self.state.record().upgrade_attempted == Some(true) {
            return Err(UpgradeError::precondition(
                "A previous upgrade attempt did not finish; run `clean` and `download` again",
            ));
        }
        Ok(Demands {
            root_user: true,
            splash: true,
        })
    }

    pub fn run_upgrade(&mut self, options: &ActionOptions) -> Result<()> {
        // One-shot: never boot into the offline phase twice.
        self.backends.boot.remove_hook()?;

        let datadir = self.state_datadir()?;
        let plan = TransactionPlan::load_verified(
            &datadir,
            self.state.record().plan_digest.as_deref(),
        )?;
        self.state.write(|record| {
            record.upgrade_attempted = Some(true);
            Ok(())
        })?;

        self.plymouth
            .message("Starting system upgrade. This will take a while.");

        let started_at = timestamp();
        self.logger.info(
            "UPGRADE",
            format!("Replaying {} transaction entries", plan.len()),
        );
        let (replayed, messages_sent) = {
            let mut display = TransactionProgress::new(&mut self.plymouth);
            let mut on_progress = |event: &ProgressEvent| display.progress(event);
            let result = self
                .backends
                .engine
                .replay(&datadir, &plan, &mut on_progress);
            (result, display.messages_sent())
        };
        self.logger.debug(
            "UPGRADE",
            format!("Sent {messages_sent} transaction messages to the splash"),
        );

        let record = HistoryRecord {
            started_at,
            finished_at: timestamp(),
            from_release: self.state.record().system_release.clone(),
            to_release: self.state.target_release().map(str::to_string),
            packages: plan.len(),
            outcome: if replayed.is_ok() {
                Outcome::Complete
            } else {
                Outcome::Failed
            },
            error: replayed.as_ref().err().map(|err| err.to_string()),
        };
        if let Err(err) = history::append(&self.config.history_path, &record) {
            self.logger
                .warn("HISTORY", format!("Failed to record upgrade history: {err}"));
        }

        if let Err(err) = replayed {
            self.logger.error("UPGRADE", format!("Transaction failed: {err}"));
            self.plymouth.message("Upgrade failed.");
            return Err(err);
        }

        self.state.write(|record| {
            record.upgrade_status = Some(UpgradeStatus::Complete);
            Ok(())
        })?;
        self.logger.info("UPGRADE", "Upgrade complete");

        if options.no_reboot {
            self.plymouth.message("Upgrade complete!");
            return Ok(());
        }
        self.plymouth.message("Upgrade complete! Rebooting...");
        self.backends.boot.reboot()
    }

    // log

    pub fn configure_log(&mut self, _options: &ActionOptions) -> Result<Demands> {
        Ok(Demands::default())
    }

    pub fn run_log(&mut self, options: &ActionOptions) -> Result<()> {
        print!("{}", self.render_log(options.number)?);
        Ok(())
    }

    /// History listing, or the detail of one attempt when `number` is set.
    pub fn render_log(&self, number: Option<usize>) -> Result<String> {
        let history = history::load(&self.config.history_path)?;
        if history.skipped > 0 {
            self.logger.warn(
                "HISTORY",
                format!("Skipped {} malformed history entries", history.skipped),
            );
        }
        match number {
            Some(number) => history::render_one(&history.records, number),
            None => Ok(history::render_list(&history.records)),
        }
    }

    // clean

    pub fn configure_clean(&mut self, _options: &ActionOptions) -> Result<Demands> {
        Ok(Demands {
            root_user: true,
            splash: false,
        })
    }

    pub fn run_clean(&mut self, _options: &ActionOptions) -> Result<()> {
        if self.backends.boot.hook_pending() {
            self.backends.boot.remove_hook()?;
            self.logger.info("CLEAN", "Removed pending offline upgrade hook");
        }
        if self.state.datadir().is_none() {
            clear_dir(&self.config.datadir).map_err(|err| {
                UpgradeError::Filesystem(format!(
                    "Failed to clear data directory {}: {err}",
                    self.config.datadir.display()
                ))
            })?;
        }
        self.state.clear()?;
        self.logger.info("CLEAN", "Upgrade data and state cleared");
        Ok(())
    }

    fn state_datadir(&self) -> Result<PathBuf> {
        self.state.datadir().map(Path::to_path_buf).ok_or_else(|| {
            UpgradeError::precondition("No download directory recorded; run `download` first")
        })
    }
}

fn prepare_datadir(datadir: &Path) -> Result<()> {
    let prepared = clear_dir(datadir).and_then(|_| std::fs::create_dir_all(datadir));
    prepared.map_err(|err| {
        UpgradeError::Filesystem(format!(
            "Failed to prepare data directory {}: {err}",
            datadir.display()
        ))
    })
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
