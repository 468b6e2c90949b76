/*============================================================
  Synavera Project: Syn-Upgrade
  Module: synupgrade_core::progress
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Fold the transaction engine's per-tick callbacks into one
    splash message per transaction item plus a percent feed.

  Security / Safety Notes:
    Package names are forwarded to the splash verbatim; no other
    transaction data leaves this module.

  Dependencies:
    crate::plymouth for the display sink, serde for the action
    tags recorded in transaction plans.

  Operational Scope:
    Attached to the engine only while the offline transaction
    is being replayed.

  Revision History:
    2025-11-12 COD  Authored transaction progress aggregator.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Display sink injected, never global
    - Deterministic message formatting
============================================================*/

use serde::{Deserialize, Serialize};

use crate::plymouth::{CommandRunner, PlymouthOutput};

/// Kind of work the engine reports for a transaction item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionAction {
    Cleanup,
    Downgrade,
    Install,
    Obsolete,
    Reinstall,
    Remove,
    Upgrade,
    Verify,
    TransactionPost,
}

impl TransactionAction {
    pub const ALL: [TransactionAction; 9] = [
        TransactionAction::Cleanup,
        TransactionAction::Downgrade,
        TransactionAction::Install,
        TransactionAction::Obsolete,
        TransactionAction::Reinstall,
        TransactionAction::Remove,
        TransactionAction::Upgrade,
        TransactionAction::Verify,
        TransactionAction::TransactionPost,
    ];

    /// Present participle shown on the splash.
    pub fn verb(self) -> &'static str {
        match self {
            TransactionAction::Cleanup => "Cleaning up",
            TransactionAction::Downgrade => "Downgrading",
            TransactionAction::Install => "Installing",
            TransactionAction::Obsolete => "Obsoleting",
            TransactionAction::Reinstall => "Reinstalling",
            TransactionAction::Remove => "Erasing",
            TransactionAction::Upgrade => "Upgrading",
            TransactionAction::Verify => "Verifying",
            TransactionAction::TransactionPost => "Finishing",
        }
    }
}

/// One callback from the transaction engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub package: String,
    pub action: TransactionAction,
    pub sub_current: u64,
    pub sub_total: u64,
    pub item_index: u32,
    pub item_total: u32,
}

/// Text and percent pushed to the splash for one transaction item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub text: String,
    pub percent: u8,
}

impl DisplayMessage {
    pub fn for_event(event: &ProgressEvent) -> Self {
        Self {
            text: format_event(&event.package, event.action, event.item_index, event.item_total),
            percent: transaction_percent(event.item_index, event.item_total),
        }
    }
}

/// Render the splash text for a transaction item.
pub fn format_event(package: &str, action: TransactionAction, current: u32, total: u32) -> String {
    match action {
        TransactionAction::TransactionPost => format!("[{current}/{total}] {}...", action.verb()),
        _ => format!("[{current}/{total}] {} {package}...", action.verb()),
    }
}

/// Position of the item within the whole transaction, floored to a
/// percentage. A zero total reads as 0.
pub fn transaction_percent(current: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = u64::from(current) * 100 / u64::from(total);
    percent.min(100) as u8
}

type ItemIdentity = (String, TransactionAction, u32, u32);

/// Aggregates engine ticks into splash updates.
///
/// The percent is forwarded on every tick and left to the splash client's
/// duplicate suppression; the message is only rebuilt when the
/// `(package, action, index, total)` identity changes.
pub struct TransactionProgress<'a, R: CommandRunner> {
    plymouth: &'a mut PlymouthOutput<R>,
    last: Option<ItemIdentity>,
    messages: usize,
}

impl<'a, R: CommandRunner> TransactionProgress<'a, R> {
    pub fn new(plymouth: &'a mut PlymouthOutput<R>) -> Self {
        Self {
            plymouth,
            last: None,
            messages: 0,
        }
    }

    /// Handle one engine callback.
    pub fn progress(&mut self, event: &ProgressEvent) {
        self.plymouth
            .progress(transaction_percent(event.item_index, event.item_total));

        let identity = (
            event.package.clone(),
            event.action,
            event.item_index,
            event.item_total,
        );
        if self.last.as_ref() == Some(&identity) {
            return;
        }
        let display = DisplayMessage::for_event(event);
        self.plymouth.message(&display.text);
        self.last = Some(identity);
        self.messages += 1;
    }

    pub fn plymouth(&self) -> &PlymouthOutput<R> {
        &*self.plymouth
    }

    /// Splash messages sent so far, one per item identity change. An item
    /// reported under two actions counts twice.
    pub fn messages_sent(&self) -> usize {
        self.messages
    }
}
