pub mod join_request;
pub mod member;
pub mod message;

use std::sync::Arc;
use tracing::error;

use crate::telegram::Update;
use crate::Data;

/// Route one update to its handler
pub async fn handle_update(update: Update, data: Arc<Data>) {
    if let Some(request) = &update.chat_join_request {
        join_request::handle_join_request(request, &data).await;
    }
    if let Some(member) = &update.chat_member {
        if let Err(e) = member::handle_chat_member(member, &data).await {
            error!("Failed to handle membership change: {}", e);
        }
    }
    if let Some(member) = &update.my_chat_member {
        member::handle_my_chat_member(member);
    }
    if let Some(msg) = &update.message {
        message::handle_message(msg, &data).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::{create_shared_admission_manager, create_shared_followup_manager};
    use crate::state::{create_shared_store, PersistentStore};
    use crate::telegram::client::fake::{FakePlatform, PlatformCall};
    use crate::telegram::User;
    use crate::verification::{
        create_shared_verification_registry, SharedVerificationRegistry, TransitionPolicy, VerificationState,
    };
    use std::time::Duration;

    fn data_with(platform: Arc<FakePlatform>) -> (Arc<Data>, SharedVerificationRegistry) {
        let store = create_shared_store(PersistentStore::in_memory().unwrap());
        let registry = create_shared_verification_registry(Some(store.clone()), TransitionPolicy::default());
        let followups = create_shared_followup_manager(platform.clone());
        let admission_manager =
            create_shared_admission_manager(platform.clone(), store, registry.clone(), followups);
        let data = Arc::new(Data {
            platform,
            admission_manager,
        });
        (data, registry)
    }

    fn group_message_update(user_id: i64, new_chat_members: serde_json::Value) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 3,
            "message": {
                "message_id": 50,
                "chat": {"id": -100, "type": "supergroup"},
                "from": {"id": user_id, "is_bot": false, "first_name": "Ann"},
                "new_chat_members": new_chat_members
            }
        }))
        .unwrap()
    }

    fn join_request_update(user_chat_id: i64) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "chat_join_request": {
                "chat": {"id": -100, "type": "supergroup", "title": "Room"},
                "from": {"id": 42, "is_bot": false, "first_name": "Ann", "username": "ann"},
                "user_chat_id": user_chat_id,
                "date": 1700000000
            }
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_request_starts_verification() {
        let platform = Arc::new(FakePlatform::default());
        let (data, registry) = data_with(platform.clone());

        handle_update(join_request_update(42), data.clone()).await;

        let event = registry.get(42).unwrap();
        assert_eq!(event.state(), VerificationState::Verifying);
        assert_eq!(event.username(), "ann");
        assert!(matches!(&platform.calls()[0], PlatformCall::Send { chat_id: 42, .. }));

        event.set_state(VerificationState::Succeeded);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(platform.calls().contains(&PlatformCall::Approve { chat_id: -100, user_id: 42 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_request_without_private_chat_is_ignored() {
        let platform = Arc::new(FakePlatform::default());
        let (data, registry) = data_with(platform.clone());

        handle_update(join_request_update(0), data.clone()).await;

        assert!(registry.is_empty());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_sends_goodbye() {
        let platform = Arc::new(FakePlatform::default());
        let (data, _) = data_with(platform.clone());

        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 2,
            "chat_member": {
                "chat": {"id": -100, "type": "supergroup"},
                "from": {"id": 7, "is_bot": false, "first_name": "Bo"},
                "date": 1700000000,
                "old_chat_member": {"status": "member", "user": {"id": 7, "is_bot": false, "first_name": "Bo"}},
                "new_chat_member": {"status": "left", "user": {"id": 7, "is_bot": false, "first_name": "Bo"}}
            }
        }))
        .unwrap();
        handle_update(update, data).await;

        assert!(matches!(
            &platform.calls()[0],
            PlatformCall::Send { chat_id: -100, text } if text.starts_with("Goodbye")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_service_message_keeps_followup_pending() {
        let platform = Arc::new(FakePlatform::default());
        let (data, _) = data_with(platform.clone());
        let member = User {
            id: 42,
            is_bot: false,
            first_name: "Ann".to_string(),
            last_name: None,
            username: None,
        };
        let followups = data.admission_manager.followups().clone();
        followups
            .start(-100, &member, Duration::from_secs(600), Duration::from_secs(600))
            .await;

        let joined = serde_json::json!([{"id": 42, "is_bot": false, "first_name": "Ann"}]);
        handle_update(group_message_update(42, joined), data.clone()).await;
        assert!(followups.is_pending(-100, 42));

        handle_update(group_message_update(42, serde_json::json!([])), data).await;
        assert!(!followups.is_pending(-100, 42));
    }
}
