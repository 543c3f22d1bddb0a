// src/messages.rs

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::verification::types::UserId;

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Clickable mention of a user
pub fn mention(user_id: UserId, name: &str) -> String {
    format!("<a href=\"tg://user?id={}\">{}</a>", user_id, escape_html(name))
}

/// Mini app deep link for the bot
pub fn mini_app_link(bot_username: &str) -> String {
    format!("https://t.me/{}?startapp", bot_username)
}

pub fn join_request_challenge_message(bot_username: &str) -> String {
    format!(
        "Click the link below to verify you're human\n{}",
        mini_app_link(bot_username)
    )
}

pub fn link_join_challenge_message(user_id: UserId, name: &str, bot_username: &str) -> String {
    format!(
        "Welcome {}! Please verify you're human before chatting: {}",
        mention(user_id, name),
        mini_app_link(bot_username)
    )
}

pub fn invited_welcome_message(inviter_id: UserId, inviter: &str, invitee_id: UserId, invitee: &str) -> String {
    format!(
        "{} added {}. Welcome!",
        mention(inviter_id, inviter),
        mention(invitee_id, invitee)
    )
}

pub fn bot_added_message(inviter_id: UserId, inviter: &str, bot_id: UserId, bot: &str) -> String {
    format!(
        "{} added the bot {}",
        mention(inviter_id, inviter),
        mention(bot_id, bot)
    )
}

pub fn goodbye_message(user_id: UserId, name: &str) -> String {
    format!("Goodbye {}", mention(user_id, name))
}

pub fn followup_welcome_message(
    user_id: UserId,
    name: &str,
    grace: Duration,
    deadline: DateTime<Utc>,
) -> String {
    format!(
        "Welcome {}! Please send a message within {} minutes (before {} UTC) or you will be removed.",
        mention(user_id, name),
        grace.as_secs().div_ceil(60),
        deadline.format("%H:%M")
    )
}

pub fn followup_done_message(user_id: UserId, name: &str) -> String {
    format!("Welcome {} to the group!", mention(user_id, name))
}

// remaining is read after the ban started and runs slightly short
const BAN_SKEW: Duration = Duration::from_secs(10);

/// Human wording for a ban length; `None` means permanent
pub fn ban_duration_text(remaining: Option<Duration>) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let Some(remaining) = remaining else {
        return "permanently".to_string();
    };
    let secs = (remaining + BAN_SKEW).as_secs();

    if secs < 15 * MINUTE {
        format!("for {} minutes", secs / MINUTE)
    } else if secs < 16 * HOUR {
        let hours = secs / HOUR;
        let minutes = (secs % HOUR) / MINUTE;
        if hours == 0 {
            format!("for {} minutes", minutes)
        } else if minutes == 0 {
            format!("for {} hours", hours)
        } else {
            format!("for {} hours {} minutes", hours, minutes)
        }
    } else if secs < 48 * HOUR {
        format!("for {} hours", secs / HOUR)
    } else if secs < 7 * DAY {
        let days = secs / DAY;
        let hours = (secs % DAY) / HOUR;
        if hours == 0 {
            format!("for {} days", days)
        } else {
            format!("for {} days {} hours", days, hours)
        }
    } else if secs < 30 * DAY {
        format!("for {} days", secs / DAY)
    } else if secs < 365 * DAY {
        format!("for {} months", secs / (30 * DAY))
    } else {
        format!("for {} years", secs / (365 * DAY))
    }
}

pub fn banned_message(user_id: UserId, name: &str, remaining: Option<Duration>) -> String {
    format!(
        "{} was banned {}",
        mention(user_id, name),
        ban_duration_text(remaining)
    )
}
