// src/verification/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram user id of the joining member
pub type UserId = i64;

/// Telegram chat id of a room
pub type ChatId = i64;

/// Lifecycle state of one verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    Verifying,
    Succeeded,
    Failed,
}

impl VerificationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, VerificationState::Verifying)
    }

    /// Status value written to the durable mirror
    pub fn status(self) -> VerificationStatus {
        match self {
            VerificationState::Verifying => VerificationStatus::Verifying,
            VerificationState::Succeeded => VerificationStatus::Success,
            VerificationState::Failed => VerificationStatus::Failed,
        }
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationState::Verifying => "verifying",
            VerificationState::Succeeded => "succeeded",
            VerificationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Durable status column of `user_verifications`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verifying,
    Success,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::Verifying => "verifying",
            VerificationStatus::Success => "success",
            VerificationStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "verifying" => Some(VerificationStatus::Verifying),
            "success" => Some(VerificationStatus::Success),
            "failed" => Some(VerificationStatus::Failed),
            _ => None,
        }
    }
}

/// What happens when a terminal event is asked to move to another terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TransitionPolicy {
    /// Once succeeded or failed, later transitions are ignored
    #[default]
    #[value(name = "final")]
    TerminalIsFinal,
    /// A different terminal state overwrites the recorded one and re-runs cleanup
    #[value(name = "last-write-wins")]
    LastWriteWins,
}

/// Point-in-time copy of an event, used for diagnostics
#[derive(Debug, Clone)]
pub struct EventSnapshot {
    pub user_id: UserId,
    pub username: String,
    pub requested_at: DateTime<Utc>,
    pub state: VerificationState,
}

impl fmt::Display for EventSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user {} (@{}) started joining at {}, current state [{}]",
            self.user_id,
            self.username,
            self.requested_at.format("%Y-%m-%d %H:%M:%S"),
            self.state
        )
    }
}
