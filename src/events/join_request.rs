use tracing::debug;

use crate::telegram::ChatJoinRequest;
use crate::Data;

/// Hand a join request to the admission manager.
///
/// Requests without a private chat to reach the user are ignored.
pub async fn handle_join_request(request: &ChatJoinRequest, data: &Data) {
    if request.user_chat_id == 0 {
        debug!(
            "Ignoring join request from user {} with no private chat",
            request.from.id
        );
        return;
    }

    // the returned waiter runs detached
    let _waiter = data.admission_manager.handle_join_request(request).await;
}
