//! Tracks newly admitted members who must speak before a deadline

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::messages::{followup_done_message, followup_welcome_message};
use crate::telegram::{SharedPlatform, User};
use crate::verification::types::{ChatId, UserId};

struct PendingFollowup {
    name: String,
    welcome_message_id: Option<i64>,
    kick_timer: AbortHandle,
}

pub struct FollowupManager {
    platform: SharedPlatform,
    pending: Arc<DashMap<(ChatId, UserId), PendingFollowup>>,
}

impl FollowupManager {
    pub fn new(platform: SharedPlatform) -> Self {
        Self {
            platform,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Post the welcome and arm the kick timer for `user` in `chat_id`.
    ///
    /// If they have not written anything after `grace` they are banned for
    /// `ban_for`. Starting again for the same member replaces the old timer.
    pub async fn start(&self, chat_id: ChatId, user: &User, grace: Duration, ban_for: Duration) {
        let key = (chat_id, user.id);
        let kick_timer = {
            let pending = self.pending.clone();
            let platform = self.platform.clone();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if pending.remove(&key).is_none() {
                    return;
                }
                let until = Utc::now() + chrono::Duration::from_std(ban_for).unwrap_or_else(|_| chrono::Duration::zero());
                match platform.ban_member(key.0, key.1, Some(until)).await {
                    Ok(()) => info!("Removed user {} from chat {}: no message in time", key.1, key.0),
                    Err(e) => warn!("Failed to remove silent user {} from chat {}: {}", key.1, key.0, e),
                }
            })
            .abort_handle()
        };

        let replaced = self.pending.insert(
            key,
            PendingFollowup {
                name: user.full_name(),
                welcome_message_id: None,
                kick_timer,
            },
        );
        if let Some(old) = replaced {
            old.kick_timer.abort();
        }

        let deadline = Utc::now() + chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let text = followup_welcome_message(user.id, &user.full_name(), grace, deadline);
        match self.platform.send_html_message(chat_id, &text).await {
            Ok(message) => {
                if let Some(mut entry) = self.pending.get_mut(&key) {
                    entry.welcome_message_id = Some(message.message_id);
                }
            }
            Err(e) => warn!("Failed to welcome user {} in chat {}: {}", user.id, chat_id, e),
        }
    }

    /// Record a group message from `user_id`. Returns whether it cleared a pending follow-up.
    pub async fn handle_message(&self, chat_id: ChatId, user_id: UserId) -> bool {
        let Some((_, followup)) = self.pending.remove(&(chat_id, user_id)) else {
            return false;
        };
        followup.kick_timer.abort();
        info!("User {} spoke in chat {}, follow-up satisfied", user_id, chat_id);

        if let Some(message_id) = followup.welcome_message_id {
            let text = followup_done_message(user_id, &followup.name);
            if let Err(e) = self.platform.edit_message_html(chat_id, message_id, &text).await {
                warn!("Failed to update welcome for user {}: {}", user_id, e);
            }
        }
        true
    }

    pub fn is_pending(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.pending.contains_key(&(chat_id, user_id))
    }
}

/// Shared follow-up manager type
pub type SharedFollowupManager = Arc<FollowupManager>;

pub fn create_shared_followup_manager(platform: SharedPlatform) -> SharedFollowupManager {
    Arc::new(FollowupManager::new(platform))
}
