// src/telegram/types.rs
//! The subset of Bot API objects the bot reads and writes.

use serde::{Deserialize, Serialize};

use crate::verification::types::{ChatId, UserId};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    /// Username without the @, empty when the user has none
    pub fn username_or_empty(&self) -> &str {
        self.username.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl Chat {
    pub fn is_group(&self) -> bool {
        self.kind == "group" || self.kind == "supergroup"
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatInviteLink {
    pub invite_link: String,
    #[serde(default)]
    pub creates_join_request: bool,
}

/// Membership of a user in a chat, tagged by `status`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChatMember {
    Creator { user: User },
    Administrator { user: User },
    Member { user: User },
    Restricted { user: User },
    Left { user: User },
    Kicked {
        user: User,
        /// Unix time the ban ends, 0 for forever
        #[serde(default)]
        until_date: i64,
    },
}

impl ChatMember {
    pub fn user(&self) -> &User {
        match self {
            ChatMember::Creator { user }
            | ChatMember::Administrator { user }
            | ChatMember::Member { user }
            | ChatMember::Restricted { user }
            | ChatMember::Left { user }
            | ChatMember::Kicked { user, .. } => user,
        }
    }

    pub fn is_outside(&self) -> bool {
        matches!(self, ChatMember::Left { .. } | ChatMember::Kicked { .. })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    pub date: i64,
    pub old_chat_member: ChatMember,
    pub new_chat_member: ChatMember,
    #[serde(default)]
    pub invite_link: Option<ChatInviteLink>,
    #[serde(default)]
    pub via_chat_folder_invite_link: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatJoinRequest {
    pub chat: Chat,
    pub from: User,
    /// Private chat with the requester, usable for 5 minutes
    #[serde(default)]
    pub user_chat_id: ChatId,
    pub date: i64,
    #[serde(default)]
    pub invite_link: Option<ChatInviteLink>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub new_chat_members: Vec<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub my_chat_member: Option<ChatMemberUpdated>,
    #[serde(default)]
    pub chat_member: Option<ChatMemberUpdated>,
    #[serde(default)]
    pub chat_join_request: Option<ChatJoinRequest>,
}

/// Permissions granted by `restrictChatMember`
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ChatPermissions {
    pub can_send_messages: bool,
    pub can_send_audios: bool,
    pub can_send_documents: bool,
    pub can_send_photos: bool,
    pub can_send_videos: bool,
    pub can_send_video_notes: bool,
    pub can_send_voice_notes: bool,
    pub can_send_polls: bool,
    pub can_send_other_messages: bool,
    pub can_add_web_page_previews: bool,
    pub can_change_info: bool,
    pub can_invite_users: bool,
    pub can_pin_messages: bool,
    pub can_manage_topics: bool,
}

impl ChatPermissions {
    /// Muted: nothing allowed
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            can_send_messages: true,
            can_send_audios: true,
            can_send_documents: true,
            can_send_photos: true,
            can_send_videos: true,
            can_send_video_notes: true,
            can_send_voice_notes: true,
            can_send_polls: true,
            can_send_other_messages: true,
            can_add_web_page_previews: true,
            can_change_info: true,
            can_invite_users: true,
            can_pin_messages: true,
            can_manage_topics: true,
        }
    }
}
