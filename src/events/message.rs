use tracing::debug;

use crate::telegram::Message;
use crate::Data;

/// Handle incoming messages
pub async fn handle_message(msg: &Message, data: &Data) {
    let Some(author) = &msg.from else {
        return;
    };

    // Ignore bot messages
    if author.is_bot {
        return;
    }

    // join service messages are sent on the new member's behalf
    if !msg.new_chat_members.is_empty() {
        return;
    }

    if !msg.chat.is_group() {
        debug!("Ignoring private message from {}", author.id);
        return;
    }

    data.admission_manager
        .followups()
        .handle_message(msg.chat.id, author.id)
        .await;
}
