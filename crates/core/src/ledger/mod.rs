//! Append-only record of generated provider commands and their captured output.
//!
//! Entries live in an arena: a command's id is its position, so ids are handed
//! out monotonically and can never collide or be reused for the lifetime of a
//! ledger. Output can be attached to an entry at most once, and only to an entry
//! that already exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u64);

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd-{:04}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: CommandId,
    pub command: String,
    pub fingerprint: String,
    pub recorded_at: DateTime<Utc>,
    pub output: Option<CommandOutput>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("command {0} is not recorded in this ledger")]
    UnknownCommand(CommandId),
    #[error("output for command {0} was already captured")]
    OutputAlreadyRecorded(CommandId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVerification {
    pub valid: bool,
    pub verified_entries: usize,
    pub failure_reason: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct CommandLedger {
    entries: Vec<CommandRecord>,
}

impl CommandLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_command(&mut self, command: impl Into<String>) -> CommandId {
        let command = command.into();
        let id = CommandId(self.entries.len() as u64);
        self.entries.push(CommandRecord {
            id,
            fingerprint: fingerprint(&command),
            command,
            recorded_at: Utc::now(),
            output: None,
        });
        id
    }

    pub fn record_output(
        &mut self,
        id: CommandId,
        stdout: impl Into<String>,
    ) -> Result<&CommandOutput, LedgerError> {
        let entry = self.entry_mut(id).ok_or(LedgerError::UnknownCommand(id))?;
        if entry.output.is_some() {
            return Err(LedgerError::OutputAlreadyRecorded(id));
        }

        let output =
            entry.output.insert(CommandOutput { stdout: stdout.into(), captured_at: Utc::now() });
        Ok(&*output)
    }

    pub fn get(&self, id: CommandId) -> Option<&CommandRecord> {
        usize::try_from(id.0).ok().and_then(|index| self.entries.get(index))
    }

    pub fn command(&self, id: CommandId) -> Option<&str> {
        self.get(id).map(|entry| entry.command.as_str())
    }

    pub fn output(&self, id: CommandId) -> Option<&str> {
        self.get(id).and_then(|entry| entry.output.as_ref()).map(|output| output.stdout.as_str())
    }

    pub fn entries(&self) -> &[CommandRecord] {
        &self.entries
    }

    /// Commands in issue order, each paired with its output when one was captured.
    pub fn history(&self) -> impl Iterator<Item = (&str, Option<&str>)> + '_ {
        self.entries.iter().map(|entry| {
            (entry.command.as_str(), entry.output.as_ref().map(|output| output.stdout.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recomputes every fingerprint so a replayed or exported ledger can be checked
    /// against the commands that were actually issued.
    pub fn verify(&self) -> LedgerVerification {
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.id.0 != index as u64 {
                return LedgerVerification {
                    valid: false,
                    verified_entries: index,
                    failure_reason: Some(format!("entry at position {index} carries id {}", entry.id)),
                };
            }
            if entry.fingerprint != fingerprint(&entry.command) {
                return LedgerVerification {
                    valid: false,
                    verified_entries: index,
                    failure_reason: Some(format!("fingerprint mismatch for {}", entry.id)),
                };
            }
        }

        LedgerVerification { valid: true, verified_entries: self.entries.len(), failure_reason: None }
    }

    fn entry_mut(&mut self, id: CommandId) -> Option<&mut CommandRecord> {
        usize::try_from(id.0).ok().and_then(|index| self.entries.get_mut(index))
    }
}

fn fingerprint(command: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{CommandId, CommandLedger, LedgerError};

    #[test]
    fn ids_stay_unique_across_ten_thousand_generations() {
        let mut ledger = CommandLedger::new();
        let mut seen = HashSet::new();

        for index in 0..10_000 {
            let id = ledger.record_command(format!("aws s3 ls --page {index}"));
            assert!(seen.insert(id), "id {id} was handed out twice");
        }

        assert_eq!(ledger.len(), 10_000);
        assert!(ledger.verify().valid);
    }

    #[test]
    fn output_requires_a_recorded_command() {
        let mut ledger = CommandLedger::new();
        let error = ledger.record_output(CommandId(3), "{}").expect_err("unknown id");
        assert_eq!(error, LedgerError::UnknownCommand(CommandId(3)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn output_is_captured_once() {
        let mut ledger = CommandLedger::new();
        let id = ledger.record_command("aws s3 ls --profile dev");

        assert_eq!(ledger.output(id), None);
        ledger.record_output(id, "2024-01-01 logs").expect("first capture");
        assert_eq!(ledger.output(id), Some("2024-01-01 logs"));

        let error = ledger.record_output(id, "second").expect_err("second capture");
        assert_eq!(error, LedgerError::OutputAlreadyRecorded(id));
        assert_eq!(ledger.output(id), Some("2024-01-01 logs"));
    }

    #[test]
    fn history_pairs_commands_with_their_outputs_in_issue_order() {
        let mut ledger = CommandLedger::new();
        let first = ledger.record_command("aws s3 ls");
        ledger.record_command("aws s3 mb s3://logs");
        ledger.record_output(first, "bucket-a").expect("capture");

        let history = ledger.history().collect::<Vec<_>>();
        assert_eq!(history, vec![("aws s3 ls", Some("bucket-a")), ("aws s3 mb s3://logs", None)]);
    }

    #[test]
    fn command_id_display_is_zero_padded() {
        assert_eq!(CommandId(7).to_string(), "cmd-0007");
    }
}
