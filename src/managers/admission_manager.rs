//! Admission of users into groups once their verification resolves
//!
//! Both join requests and direct joins through an invite link share the
//! user's single verification event. Each room gets its own detached waiter,
//! so one solved challenge admits the user everywhere they are waiting.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::followup_manager::SharedFollowupManager;
use crate::error::Result;
use crate::messages::{join_request_challenge_message, link_join_challenge_message};
use crate::state::{GroupConfig, SharedStore};
use crate::telegram::{ChatJoinRequest, ChatPermissions, SharedPlatform, User};
use crate::verification::types::ChatId;
use crate::verification::{SharedVerificationRegistry, VerificationEvent, VerificationState};

pub struct AdmissionManager {
    platform: SharedPlatform,
    store: SharedStore,
    registry: SharedVerificationRegistry,
    followups: SharedFollowupManager,
}

impl AdmissionManager {
    pub fn new(
        platform: SharedPlatform,
        store: SharedStore,
        registry: SharedVerificationRegistry,
        followups: SharedFollowupManager,
    ) -> Self {
        Self {
            platform,
            store,
            registry,
            followups,
        }
    }

    /// Room settings, or the defaults when the store cannot be read
    fn group_config(&self, chat_id: ChatId) -> GroupConfig {
        self.store
            .get_or_create_group_config(chat_id)
            .unwrap_or_else(|e| {
                warn!("Failed to load config for chat {}, using defaults: {}", chat_id, e);
                GroupConfig::with_defaults(chat_id)
            })
    }

    /// Find or start the user's verification and record that `chat_id` waits on it
    fn begin_verification(&self, user: &User, chat_id: ChatId, timeout: Duration) -> Arc<VerificationEvent> {
        let username = user.username_or_empty();
        let (event, existed) = self.registry.get_or_create(user.id, username, timeout);
        if existed {
            event.update_username(username);
            event.persist();
        }

        if let Err(e) = self.store.add_pending_group(user.id, chat_id) {
            warn!(
                "Failed to record pending join of user {} to chat {}: {}",
                user.id, chat_id, e
            );
        }
        // a resolved event never clears links again
        if event.state().is_terminal() {
            if let Err(e) = self.store.delete_pending_groups_by_user(user.id) {
                warn!("Failed to clear pending groups for user {}: {}", user.id, e);
            }
        }
        event
    }

    /// Handle a request to join a room that requires approval.
    ///
    /// Returns the waiter that approves or declines once verification resolves.
    pub async fn handle_join_request(&self, request: &ChatJoinRequest) -> JoinHandle<()> {
        let chat_id = request.chat.id;
        let user = &request.from;
        let config = self.group_config(chat_id);

        info!(
            "Join request from {} ({}) for chat {}",
            user.full_name(),
            user.id,
            chat_id
        );
        let event = self.begin_verification(user, chat_id, config.verification_timeout());

        let text = join_request_challenge_message(self.platform.bot_username());
        if let Err(e) = self.platform.send_message(request.user_chat_id, &text).await {
            error!("Failed to send challenge to user {}: {}", user.id, e);
        }

        let platform = self.platform.clone();
        let user_id = user.id;
        tokio::spawn(async move {
            match event.wait_for_terminal().await {
                VerificationState::Succeeded => {
                    match platform.approve_join_request(chat_id, user_id).await {
                        Ok(()) => info!("Approved user {} into chat {}", user_id, chat_id),
                        Err(e) => error!("Failed to approve user {} into chat {}: {}", user_id, chat_id, e),
                    }
                }
                VerificationState::Failed => {
                    match platform.decline_join_request(chat_id, user_id).await {
                        Ok(()) => info!("Declined user {} for chat {}", user_id, chat_id),
                        Err(e) => error!("Failed to decline user {} for chat {}: {}", user_id, chat_id, e),
                    }
                }
                VerificationState::Verifying => {
                    warn!(
                        "Verification of user {} expired unresolved, leaving request in chat {}",
                        user_id, chat_id
                    );
                }
            }
        })
    }

    /// Handle a member who entered without a join request.
    ///
    /// The member is muted until verification resolves, then unmuted or banned.
    pub async fn handle_direct_join(&self, chat_id: ChatId, user: &User) -> Result<JoinHandle<()>> {
        let config = self.group_config(chat_id);

        self.platform
            .restrict_member(chat_id, user.id, ChatPermissions::none())
            .await?;
        info!("Muted {} ({}) in chat {} pending verification", user.full_name(), user.id, chat_id);

        let event = self.begin_verification(user, chat_id, config.verification_timeout());

        let text = link_join_challenge_message(user.id, &user.full_name(), self.platform.bot_username());
        if let Err(e) = self.platform.send_html_message(chat_id, &text).await {
            error!("Failed to send challenge to user {} in chat {}: {}", user.id, chat_id, e);
        }

        let platform = self.platform.clone();
        let followups = self.followups.clone();
        let user = user.clone();
        Ok(tokio::spawn(async move {
            match event.wait_for_terminal().await {
                VerificationState::Succeeded => {
                    if let Err(e) = platform
                        .restrict_member(chat_id, user.id, ChatPermissions::all())
                        .await
                    {
                        error!("Failed to unmute user {} in chat {}: {}", user.id, chat_id, e);
                        return;
                    }
                    info!("Unmuted user {} in chat {}", user.id, chat_id);
                    if config.require_followup_message {
                        followups
                            .start(chat_id, &user, config.kick_grace_period(), config.ban_cooldown())
                            .await;
                    }
                }
                VerificationState::Failed => {
                    let until = Utc::now()
                        + chrono::Duration::from_std(config.ban_cooldown())
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    match platform.ban_member(chat_id, user.id, Some(until)).await {
                        Ok(()) => info!("Banned unverified user {} from chat {}", user.id, chat_id),
                        Err(e) => error!("Failed to ban user {} from chat {}: {}", user.id, chat_id, e),
                    }
                }
                VerificationState::Verifying => {
                    warn!("Verification of user {} expired unresolved in chat {}", user.id, chat_id);
                }
            }
        }))
    }

    /// A join request was approved and the user is now a member
    pub async fn handle_approved_join(&self, chat_id: ChatId, user: &User) {
        let config = self.group_config(chat_id);
        if config.require_followup_message {
            self.followups
                .start(chat_id, user, config.kick_grace_period(), config.ban_cooldown())
                .await;
        }
    }

    pub fn followups(&self) -> &SharedFollowupManager {
        &self.followups
    }
}

/// Shared admission manager type
pub type SharedAdmissionManager = Arc<AdmissionManager>;

pub fn create_shared_admission_manager(
    platform: SharedPlatform,
    store: SharedStore,
    registry: SharedVerificationRegistry,
    followups: SharedFollowupManager,
) -> SharedAdmissionManager {
    Arc::new(AdmissionManager::new(platform, store, registry, followups))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::followup_manager::create_shared_followup_manager;
    use crate::state::{create_shared_store, PersistentStore};
    use crate::telegram::client::fake::{FakePlatform, PlatformCall};
    use crate::telegram::types::Chat;
    use crate::verification::types::VerificationStatus;
    use crate::verification::{create_shared_verification_registry, TransitionPolicy};

    struct Harness {
        platform: Arc<FakePlatform>,
        store: SharedStore,
        registry: SharedVerificationRegistry,
        admission: AdmissionManager,
    }

    fn harness_with(platform: FakePlatform) -> Harness {
        let platform = Arc::new(platform);
        let store = create_shared_store(PersistentStore::in_memory().unwrap());
        let registry = create_shared_verification_registry(Some(store.clone()), TransitionPolicy::default());
        let followups = create_shared_followup_manager(platform.clone());
        let admission = AdmissionManager::new(platform.clone(), store.clone(), registry.clone(), followups);
        Harness {
            platform,
            store,
            registry,
            admission,
        }
    }

    fn harness() -> Harness {
        harness_with(FakePlatform::default())
    }

    fn user(id: i64) -> User {
        User {
            id,
            is_bot: false,
            first_name: "Ann".to_string(),
            last_name: None,
            username: Some("ann".to_string()),
        }
    }

    fn join_request(user_id: i64, chat_id: ChatId) -> ChatJoinRequest {
        ChatJoinRequest {
            chat: Chat {
                id: chat_id,
                kind: "supergroup".to_string(),
                title: Some("Room".to_string()),
            },
            from: user(user_id),
            user_chat_id: user_id,
            date: 0,
            invite_link: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_approves_every_waiting_room() {
        let h = harness();

        let first = h.admission.handle_join_request(&join_request(10, -1)).await;
        let second = h.admission.handle_join_request(&join_request(10, -2)).await;
        assert_eq!(h.registry.len(), 1);
        assert_eq!(h.store.list_pending_groups(10).unwrap().len(), 2);

        let event = h.registry.get(10).unwrap();
        event.set_state(VerificationState::Succeeded);
        first.await.unwrap();
        second.await.unwrap();

        let calls = h.platform.calls();
        assert!(calls.contains(&PlatformCall::Approve { chat_id: -1, user_id: 10 }));
        assert!(calls.contains(&PlatformCall::Approve { chat_id: -2, user_id: 10 }));
        assert!(!calls.iter().any(|c| matches!(c, PlatformCall::Decline { .. })));
        assert!(h.store.list_pending_groups(10).unwrap().is_empty());

        let record = h.store.get_user_verification(10).unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_after_resolution_leaves_no_pending_link() {
        let h = harness();

        let first = h.admission.handle_join_request(&join_request(17, -1)).await;
        h.registry.get(17).unwrap().set_state(VerificationState::Succeeded);
        first.await.unwrap();

        let second = h.admission.handle_join_request(&join_request(17, -2)).await;
        second.await.unwrap();

        assert!(h.platform.calls().contains(&PlatformCall::Approve { chat_id: -2, user_id: 17 }));
        assert!(h.store.list_pending_groups(17).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_message_goes_to_private_chat() {
        let h = harness();
        h.admission.handle_join_request(&join_request(11, -1)).await;

        let calls = h.platform.calls();
        assert!(matches!(
            &calls[0],
            PlatformCall::Send { chat_id: 11, text } if text.contains("https://t.me/gate_bot?startapp")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_challenge_declines_after_deadline() {
        let h = harness();
        let waiter = h.admission.handle_join_request(&join_request(12, -1)).await;

        tokio::time::sleep(Duration::from_secs(359)).await;
        assert!(!h.platform.calls().iter().any(|c| matches!(c, PlatformCall::Decline { .. })));

        waiter.await.unwrap();
        assert!(h.platform.calls().contains(&PlatformCall::Decline { chat_id: -1, user_id: 12 }));

        // a late success changes nothing
        let event = h.registry.get(12).unwrap();
        assert!(!event.set_state(VerificationState::Succeeded));
        assert_eq!(event.state(), VerificationState::Failed);
        assert!(!h.platform.calls().iter().any(|c| matches!(c, PlatformCall::Approve { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_timeout_comes_from_group_config() {
        let h = harness();
        let mut config = GroupConfig::with_defaults(-5);
        config.verification_timeout_seconds = 60;
        h.store.upsert_group_config(&config).unwrap();

        let waiter = h.admission.handle_join_request(&join_request(13, -5)).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        waiter.await.unwrap();
        assert!(h.platform.calls().contains(&PlatformCall::Decline { chat_id: -5, user_id: 13 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_failure_is_not_retried() {
        let h = harness_with(FakePlatform::failing_decisions());
        let waiter = h.admission.handle_join_request(&join_request(14, -1)).await;
        h.registry.get(14).unwrap().set_state(VerificationState::Succeeded);
        waiter.await.unwrap();

        let approvals = h
            .platform
            .calls()
            .iter()
            .filter(|c| matches!(c, PlatformCall::Approve { .. }))
            .count();
        assert_eq!(approvals, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_join_success_unmutes_and_requires_followup() {
        let h = harness();
        let mut config = GroupConfig::with_defaults(-7);
        config.require_followup_message = true;
        h.store.upsert_group_config(&config).unwrap();

        let waiter = h.admission.handle_direct_join(-7, &user(15)).await.unwrap();
        assert_eq!(
            h.platform.calls()[0],
            PlatformCall::Restrict {
                chat_id: -7,
                user_id: 15,
                permissions: ChatPermissions::none()
            }
        );

        h.registry.get(15).unwrap().set_state(VerificationState::Succeeded);
        waiter.await.unwrap();

        assert!(h.platform.calls().contains(&PlatformCall::Restrict {
            chat_id: -7,
            user_id: 15,
            permissions: ChatPermissions::all()
        }));
        assert!(h.admission.followups().is_pending(-7, 15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_join_failure_bans_for_cooldown() {
        let h = harness();
        let waiter = h.admission.handle_direct_join(-8, &user(16)).await.unwrap();

        h.registry.get(16).unwrap().set_state(VerificationState::Failed);
        waiter.await.unwrap();

        assert!(h
            .platform
            .calls()
            .iter()
            .any(|c| matches!(c, PlatformCall::Ban { chat_id: -8, user_id: 16, until: Some(_) })));
    }
}
