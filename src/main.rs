/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::main
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Entry point for Syn-Upgrade Core. Parses one action per
    invocation and drives it through the phase-gated upgrade
    workflow: download, reboot, upgrade, log, clean.

  Security / Safety Notes:
    Phases that touch the host demand root; the check happens
    after the phase gate so blocked phases explain themselves
    to unprivileged operators too.

  Dependencies:
    clap for CLI parsing, chrono for log session stamps, libc
    for the effective uid.

  Operational Scope:
    Invoked by operators for download/reboot/log/clean and by
    the offline-update boot unit for `upgrade`.

  Revision History:
    2025-10-28 COD  Authored Syn-Syu Core runtime.
    2025-11-12 COD  Reworked into the Syn-Upgrade workflow.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Structured logging following Synavera cadence
    - Configurable execution via CLI and config file
============================================================*/

mod boot;
mod config;
mod dnf;
mod error;
mod history;
mod logger;
mod plan;
mod plymouth;
mod progress;
mod state;
mod upgrade;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};

use boot::MagicSymlinkBoot;
use config::UpgradeConfig;
use dnf::{DnfResolver, OsRelease, RpmEngine, RpmProbe};
use error::Result;
use logger::Logger;
use plymouth::{PlymouthOutput, SystemRunner};
use upgrade::{Action, ActionOptions, Backends, SystemUpgrade};

/// Command-line arguments for Syn-Upgrade-Core.
#[derive(Debug, Parser)]
#[command(
    name = "Syn-Upgrade-Core",
    version,
    author = "Synavera Systems",
    about = "Offline release upgrades, one phase at a time"
)]
struct Cli {
    /// Override configuration file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Explicit log file path.
    #[arg(long, global = true, value_name = "PATH")]
    log: Option<PathBuf>,
    /// Enable verbose logging to stderr.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    action: ActionCommand,
}

#[derive(Debug, Subcommand)]
enum ActionCommand {
    /// Download everything needed to upgrade to a new release.
    Download(DownloadArgs),
    /// Reboot into the offline upgrade.
    Reboot(RebootArgs),
    /// Apply the downloaded transaction (offline boot only).
    Upgrade(RebootArgs),
    /// Show past upgrade attempts.
    Log(LogArgs),
    /// Remove downloaded data and forget the pending upgrade.
    Clean,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// Release to upgrade to.
    #[arg(long, value_name = "VERSION")]
    releasever: String,
    /// Force installed versions to match the target repositories.
    #[arg(long, action = ArgAction::SetTrue)]
    distro_sync: bool,
    /// Allow removing installed packages to resolve conflicts.
    #[arg(long, action = ArgAction::SetTrue)]
    allow_erasing: bool,
    /// Permit a download for the release already installed.
    #[arg(long, action = ArgAction::SetTrue)]
    allow_same_release: bool,
}

#[derive(Debug, Args)]
struct RebootArgs {
    /// Do not reboot once the phase finishes.
    #[arg(long, action = ArgAction::SetTrue)]
    no_reboot: bool,
}

#[derive(Debug, Args)]
struct LogArgs {
    /// Show the detail of one attempt.
    #[arg(long, value_name = "N")]
    number: Option<usize>,
}

impl ActionCommand {
    fn split(&self) -> (Action, ActionOptions) {
        match self {
            ActionCommand::Download(args) => (
                Action::Download,
                ActionOptions {
                    releasever: Some(args.releasever.clone()),
                    distro_sync: args.distro_sync,
                    allow_erasing: args.allow_erasing,
                    allow_same_release: args.allow_same_release,
                    ..ActionOptions::default()
                },
            ),
            ActionCommand::Reboot(args) => (
                Action::Reboot,
                ActionOptions {
                    no_reboot: args.no_reboot,
                    ..ActionOptions::default()
                },
            ),
            ActionCommand::Upgrade(args) => (
                Action::Upgrade,
                ActionOptions {
                    no_reboot: args.no_reboot,
                    ..ActionOptions::default()
                },
            ),
            ActionCommand::Log(args) => (
                Action::Log,
                ActionOptions {
                    number: args.number,
                    ..ActionOptions::default()
                },
            ),
            ActionCommand::Clean => (Action::Clean, ActionOptions::default()),
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[Syn-Upgrade] {}", err);
            err.exit_code()
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = UpgradeConfig::load_from_optional_path(cli.config.as_deref())?;
    let (action, options) = cli.action.split();

    let session_stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = cli.log.clone().or_else(|| {
        is_root().then(|| {
            config
                .log_dir
                .join(format!("{}_{session_stamp}.log", action.name()))
        })
    });
    let logger = Logger::new(log_path, cli.verbose)?;
    logger.info("INIT", format!("Syn-Upgrade Core awakening for `{action}`."));

    let backends = Backends {
        resolver: Box::new(DnfResolver::new(config.dnf_bin.clone())),
        engine: Box::new(RpmEngine::new(config.rpm_bin.clone())),
        boot: Box::new(MagicSymlinkBoot::new(
            config.boot_hook_path.clone(),
            config.systemctl_bin.clone(),
        )),
        package_manager: Box::new(RpmProbe::new(config.rpm_bin.clone(), "dnf".to_string())),
        release: Box::new(OsRelease::new(config.os_release_path.clone())),
    };
    let plymouth = PlymouthOutput::new(config.plymouth_bin.clone(), SystemRunner);
    let mut command = SystemUpgrade::new(config, backends, plymouth, logger);

    let outcome = command.execute(action, &options, is_root());
    if let Err(err) = &outcome {
        if err.is_programming_error() {
            command.logger().error("INTERNAL", format!("{err}"));
        } else {
            command.logger().warn("PHASE", format!("`{action}` stopped: {err}"));
        }
    }
    command.logger().info("COMPLETE", "Session closed.");
    command.logger().finalize()?;
    outcome?;

    Ok(ExitCode::SUCCESS)
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("synupgrade").chain(args.iter().copied()))
    }

    #[test]
    fn every_action_parses() {
        let cases: [(&[&str], Action); 5] = [
            (&["download", "--releasever", "42"], Action::Download),
            (&["reboot"], Action::Reboot),
            (&["upgrade"], Action::Upgrade),
            (&["log"], Action::Log),
            (&["clean"], Action::Clean),
        ];
        for (args, expected) in cases {
            let cli = parse(args).unwrap();
            assert_eq!(cli.action.split().0, expected);
        }
    }

    #[test]
    fn download_flags_reach_options() {
        let cli = parse(&["download", "--releasever=42", "--distro-sync", "--allow-erasing"]).unwrap();
        let (_, options) = cli.action.split();
        assert_eq!(options.releasever.as_deref(), Some("42"));
        assert!(options.distro_sync);
        assert!(options.allow_erasing);
        assert!(!options.no_reboot);
    }

    #[test]
    fn bad_options_are_rejected() {
        for bad in ["--turbo", "--releaseversion=rawhide", "explode"] {
            let err = parse(&["download", "--releasever", "42", bad]).unwrap_err();
            assert!(matches!(
                err.kind(),
                ErrorKind::UnknownArgument | ErrorKind::InvalidSubcommand
            ));
            assert!(err.to_string().contains(bad.split('=').next().unwrap_or(bad)));
        }
    }

    #[test]
    fn bad_action_is_rejected() {
        let err = parse(&["explode"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        assert!(err.to_string().contains("explode"));
    }

    #[test]
    fn download_requires_release() {
        let err = parse(&["download"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = parse(&["log", "--number", "2", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.action.split().1.number, Some(2));
    }
}
