use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::messages::{bot_added_message, banned_message, goodbye_message, invited_welcome_message};
use crate::telegram::{ChatMember, ChatMemberUpdated, User};
use crate::Data;

/// What a `chat_member` update means for the bot
#[derive(Debug, PartialEq)]
pub enum MemberChange<'a> {
    /// Added by another member
    Invited { inviter: &'a User, invitee: &'a User },
    /// Came in through an approved join request
    JoinedByRequest(&'a User),
    /// Came in directly, through an invite link or a public group
    JoinedDirectly(&'a User),
    Left(&'a User),
    Banned {
        user: &'a User,
        until: Option<DateTime<Utc>>,
    },
    Other,
}

fn is_inside(member: &ChatMember) -> bool {
    matches!(member, ChatMember::Member { .. } | ChatMember::Restricted { .. })
}

pub fn classify(update: &ChatMemberUpdated) -> MemberChange<'_> {
    let subject = update.new_chat_member.user();
    let actor = &update.from;

    match &update.new_chat_member {
        ChatMember::Kicked { until_date, .. } => {
            let until = match *until_date {
                0 => None,
                secs => Utc.timestamp_opt(secs, 0).single(),
            };
            return MemberChange::Banned { user: subject, until };
        }
        ChatMember::Left { .. } if !update.old_chat_member.is_outside() => {
            return MemberChange::Left(subject);
        }
        _ => {}
    }

    if !update.old_chat_member.is_outside() || !is_inside(&update.new_chat_member) {
        return MemberChange::Other;
    }

    let by_someone_else = actor.id != subject.id;
    match &update.invite_link {
        Some(link) if link.creates_join_request => MemberChange::JoinedByRequest(subject),
        // only an approval lets a bot bring someone in
        _ if by_someone_else && actor.is_bot => MemberChange::JoinedByRequest(subject),
        None if by_someone_else => MemberChange::Invited {
            inviter: actor,
            invitee: subject,
        },
        _ => MemberChange::JoinedDirectly(subject),
    }
}

/// Handle a membership change in a group the bot administers
pub async fn handle_chat_member(update: &ChatMemberUpdated, data: &Data) -> Result<()> {
    let chat_id = update.chat.id;

    match classify(update) {
        MemberChange::Invited { inviter, invitee } => {
            info!("{} added {} to chat {}", inviter.id, invitee.id, chat_id);
            let text = if invitee.is_bot {
                bot_added_message(inviter.id, &inviter.full_name(), invitee.id, &invitee.full_name())
            } else {
                invited_welcome_message(inviter.id, &inviter.full_name(), invitee.id, &invitee.full_name())
            };
            data.platform.send_html_message(chat_id, &text).await?;
        }
        MemberChange::JoinedByRequest(user) => {
            info!("User {} joined chat {} through a join request", user.id, chat_id);
            data.admission_manager.handle_approved_join(chat_id, user).await;
        }
        MemberChange::JoinedDirectly(user) => {
            if user.is_bot {
                return Ok(());
            }
            info!("User {} joined chat {} directly", user.id, chat_id);
            data.admission_manager.handle_direct_join(chat_id, user).await?;
        }
        MemberChange::Left(user) => {
            info!("User {} left chat {}", user.id, chat_id);
            data.platform
                .send_html_message(chat_id, &goodbye_message(user.id, &user.full_name()))
                .await?;
        }
        MemberChange::Banned { user, until } => {
            let remaining = until.map(|until| (until - Utc::now()).to_std().unwrap_or_default());
            info!("User {} banned from chat {}", user.id, chat_id);
            data.platform
                .send_html_message(chat_id, &banned_message(user.id, &user.full_name(), remaining))
                .await?;
        }
        MemberChange::Other => {
            debug!("Ignoring membership change in chat {}", chat_id);
        }
    }
    Ok(())
}

/// Log changes to the bot's own membership
pub fn handle_my_chat_member(update: &ChatMemberUpdated) {
    match &update.new_chat_member {
        ChatMember::Administrator { .. } => {
            info!("Bot is now an administrator in chat {}", update.chat.id)
        }
        member if member.is_outside() => info!("Bot was removed from chat {}", update.chat.id),
        _ => info!(
            "Bot membership changed in chat {} by {}",
            update.chat.id, update.from.id
        ),
    }
}
