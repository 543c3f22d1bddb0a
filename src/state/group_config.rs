use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::verification::types::ChatId;

pub const DEFAULT_VERIFICATION_TIMEOUT_SECONDS: i64 = 360;
pub const DEFAULT_FAILURE_BAN_COOLDOWN_SECONDS: i64 = 600;
pub const DEFAULT_KICK_GRACE_PERIOD_SECONDS: i64 = 600;

/// Per-room verification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub chat_id: ChatId,

    /// Members who joined by link must say something after passing verification
    pub require_followup_message: bool,

    pub verification_timeout_seconds: i64,
    pub failure_ban_cooldown_seconds: i64,
    pub kick_grace_period_seconds: i64,

    /// Set by the store, ignored on write
    pub updated_at: Option<DateTime<Utc>>,
}

impl GroupConfig {
    /// Defaults used for a room that has never been configured
    pub fn with_defaults(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            require_followup_message: false,
            verification_timeout_seconds: DEFAULT_VERIFICATION_TIMEOUT_SECONDS,
            failure_ban_cooldown_seconds: DEFAULT_FAILURE_BAN_COOLDOWN_SECONDS,
            kick_grace_period_seconds: DEFAULT_KICK_GRACE_PERIOD_SECONDS,
            updated_at: None,
        }
    }

    pub fn verification_timeout(&self) -> Duration {
        seconds_or(self.verification_timeout_seconds, Duration::from_secs(6 * 60))
    }

    pub fn ban_cooldown(&self) -> Duration {
        seconds_or(self.failure_ban_cooldown_seconds, Duration::from_secs(10 * 60))
    }

    pub fn kick_grace_period(&self) -> Duration {
        seconds_or(self.kick_grace_period_seconds, Duration::from_secs(10 * 60))
    }
}

fn seconds_or(seconds: i64, fallback: Duration) -> Duration {
    if seconds <= 0 {
        fallback
    } else {
        Duration::from_secs(seconds as u64)
    }
}
