//! Telegram Bot API adapter
//!
//! Everything the bot does on Telegram goes through [`ChatPlatform`], which
//! [`TelegramClient`] implements over plain HTTPS calls.

pub mod client;
pub mod polling;
pub mod types;

pub use client::{ChatPlatform, SharedPlatform, TelegramClient};
pub use polling::run_polling;
pub use types::{ChatJoinRequest, ChatMember, ChatMemberUpdated, ChatPermissions, Message, Update, User};
