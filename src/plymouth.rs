/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::plymouth
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Drive the Plymouth boot splash during the offline upgrade:
    liveness probing, status text, percent and mode changes.

  Security / Safety Notes:
    The splash is cosmetic. Every failure, including a missing
    binary, is absorbed here and never blocks the upgrade.

  Dependencies:
    std::process for helper invocation.

  Operational Scope:
    Owned by the workflow controller and lent to the transaction
    progress aggregator for the duration of a replay.

  Revision History:
    2025-11-12 COD  Authored Plymouth client.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit liveness state machine
    - Duplicate suppression per splash command
============================================================*/

use std::collections::HashMap;
use std::io;
use std::process::{Command, Stdio};

/// Executes helper binaries and reports their exit status.
pub trait CommandRunner {
    /// Run `program` with `args`, returning its exit code. Spawn failures
    /// (including a missing executable) surface as `Err`.
    fn call(&mut self, program: &str, args: &[String]) -> io::Result<i32>;
}

/// Runs helpers as real child processes, blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn call(&mut self, program: &str, args: &[String]) -> io::Result<i32> {
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Whether the splash helper is believed to be reachable.
///
/// Every invocation that actually runs decides the next state: exit status 0
/// moves to `Alive`, a non-zero status or spawn failure moves to `Dead`.
/// While `Dead`, only `--ping` is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

const PING: &str = "--ping";

/// Client for the Plymouth command-line protocol.
pub struct PlymouthOutput<R: CommandRunner> {
    runner: R,
    program: String,
    liveness: Liveness,
    last_args: HashMap<&'static str, Vec<String>>,
}

impl<R: CommandRunner> PlymouthOutput<R> {
    pub fn new<S: Into<String>>(program: S, runner: R) -> Self {
        Self {
            runner,
            program: program.into(),
            liveness: Liveness::Alive,
            last_args: HashMap::new(),
        }
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn alive(&self) -> bool {
        self.liveness == Liveness::Alive
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Probe the splash daemon. Always sent, even while dead.
    pub fn ping(&mut self) -> bool {
        self.send(PING, Vec::new())
    }

    /// Replace the splash status text.
    pub fn message(&mut self, text: &str) -> bool {
        self.send("display-message", vec!["--text".into(), text.into()])
    }

    /// Update the splash progress bar.
    pub fn progress(&mut self, percent: u8) -> bool {
        self.send(
            "system-update",
            vec!["--progress".into(), percent.min(100).to_string()],
        )
    }

    /// Switch the splash into a named mode, e.g. `updates`.
    pub fn set_mode(&mut self, mode: &str) -> bool {
        self.send("change-mode", vec![format!("--{mode}")])
    }

    fn send(&mut self, command: &'static str, args: Vec<String>) -> bool {
        let is_ping = command == PING;
        let duplicate = self.last_args.get(command) == Some(&args);
        if !is_ping && (!self.alive() || duplicate) {
            return self.alive();
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(command.to_string());
        argv.extend(args.iter().cloned());
        self.liveness = match self.runner.call(&self.program, &argv) {
            Ok(0) => Liveness::Alive,
            Ok(_) | Err(_) => Liveness::Dead,
        };
        self.last_args.insert(command, args);
        self.alive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{argv, RecordingRunner, Reply};
    use super::*;

    const MSG: &str = "Hello, plymouth.";

    fn plymouth() -> PlymouthOutput<RecordingRunner> {
        PlymouthOutput::new("plymouth", RecordingRunner::new())
    }

    fn set_reply(ply: &mut PlymouthOutput<RecordingRunner>, reply: Reply) {
        ply.runner.reply = reply;
    }

    #[test]
    fn ping_marks_alive() {
        let mut ply = plymouth();
        assert!(ply.ping());
        assert_eq!(ply.runner().calls, vec![argv(&["plymouth", "--ping"])]);
        assert!(ply.alive());
    }

    #[test]
    fn ping_is_sent_while_dead() {
        let mut ply = plymouth();
        set_reply(&mut ply, Reply::Exit(1));
        ply.ping();
        assert_eq!(ply.liveness(), Liveness::Dead);
        set_reply(&mut ply, Reply::Exit(0));
        ply.ping();
        assert_eq!(ply.runner().calls.len(), 2);
        assert!(ply.alive());
    }

    #[test]
    fn missing_binary_on_mode_change_is_swallowed() {
        let mut ply = plymouth();
        set_reply(&mut ply, Reply::Missing);
        assert!(!ply.set_mode("updates"));
        assert!(!ply.alive());
    }

    #[test]
    fn message_sends_display_message() {
        let mut ply = plymouth();
        ply.message(MSG);
        assert_eq!(
            ply.runner().calls,
            vec![argv(&["plymouth", "display-message", "--text", MSG])]
        );
    }

    #[test]
    fn duplicate_message_is_sent_once() {
        let mut ply = plymouth();
        ply.message(MSG);
        ply.message(MSG);
        assert_eq!(ply.runner().calls.len(), 1);
    }

    #[test]
    fn dead_client_skips_messages() {
        let mut ply = plymouth();
        set_reply(&mut ply, Reply::Exit(1));
        ply.message(MSG);
        assert!(!ply.alive());
        ply.message("not even gonna bother");
        assert_eq!(
            ply.runner().calls,
            vec![argv(&["plymouth", "display-message", "--text", MSG])]
        );
    }

    #[test]
    fn successful_ping_revives_messages() {
        let mut ply = plymouth();
        set_reply(&mut ply, Reply::Missing);
        ply.message(MSG);
        set_reply(&mut ply, Reply::Exit(0));
        ply.ping();
        ply.message("back again");
        assert_eq!(ply.runner().calls.len(), 3);
        assert!(ply.alive());
    }

    #[test]
    fn progress_sends_percent() {
        let mut ply = plymouth();
        ply.progress(27);
        assert_eq!(
            ply.runner().calls,
            vec![argv(&["plymouth", "system-update", "--progress", "27"])]
        );
    }

    #[test]
    fn progress_and_message_dedupe_independently() {
        let mut ply = plymouth();
        ply.progress(5);
        ply.message(MSG);
        ply.progress(5);
        ply.message(MSG);
        ply.progress(6);
        assert_eq!(ply.runner().calls.len(), 3);
    }

    #[test]
    fn mode_change_uses_flag_form() {
        let mut ply = plymouth();
        ply.set_mode("updates");
        assert_eq!(
            ply.runner().calls,
            vec![argv(&["plymouth", "change-mode", "--updates"])]
        );
    }
}
