//! Bot API client and the platform seam the rest of the bot talks to

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::types::{ChatPermissions, Message, Update, User};
use crate::error::{BotError, Result};
use crate::verification::types::{ChatId, UserId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Actions the bot takes on the chat platform
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// The bot's own @username, used to build mini app links
    fn bot_username(&self) -> &str;

    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<Message>;

    async fn send_html_message(&self, chat_id: ChatId, html: &str) -> Result<Message>;

    async fn edit_message_html(&self, chat_id: ChatId, message_id: i64, html: &str) -> Result<()>;

    async fn approve_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;

    async fn decline_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;

    /// Ban until `until`, or forever when `None`
    async fn ban_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn restrict_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        permissions: ChatPermissions,
    ) -> Result<()>;
}

/// Shared platform type
pub type SharedPlatform = Arc<dyn ChatPlatform>;

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramClient {
    http: reqwest::Client,
    api_addr: String,
    token: String,
    me: User,
}

impl TelegramClient {
    /// Connect and identify the bot with `getMe`
    pub async fn connect(api_addr: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let mut client = Self {
            http,
            api_addr: api_addr.trim_end_matches('/').to_string(),
            token: token.to_string(),
            me: User {
                id: 0,
                is_bot: true,
                first_name: String::new(),
                last_name: None,
                username: None,
            },
        };
        client.me = client.call("getMe", &json!({})).await?;
        Ok(client)
    }

    pub fn me(&self) -> &User {
        &self.me
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, REQUEST_TIMEOUT).await
    }

    async fn call_with_timeout<P, R>(&self, method: &str, params: &P, timeout: Duration) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/bot{}/{}", self.api_addr, self.token, method);
        debug!("Calling Bot API method {}", method);

        let response: ApiResponse<R> = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(params)
            .send()
            .await?
            .json()
            .await?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(BotError::Telegram {
                method: method.to_string(),
                description: response
                    .description
                    .unwrap_or_else(|| "no result in response".to_string()),
            }),
        }
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let params = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "my_chat_member", "chat_member", "chat_join_request"],
        });
        // the request must outlive the server-side long poll
        self.call_with_timeout("getUpdates", &params, REQUEST_TIMEOUT + Duration::from_secs(timeout_secs))
            .await
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    fn bot_username(&self) -> &str {
        self.me.username_or_empty()
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<Message> {
        self.call("sendMessage", &json!({ "chat_id": chat_id, "text": text }))
            .await
    }

    async fn send_html_message(&self, chat_id: ChatId, html: &str) -> Result<Message> {
        self.call(
            "sendMessage",
            &json!({ "chat_id": chat_id, "text": html, "parse_mode": "HTML" }),
        )
        .await
    }

    async fn edit_message_html(&self, chat_id: ChatId, message_id: i64, html: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": html,
                    "parse_mode": "HTML",
                }),
            )
            .await?;
        Ok(())
    }

    async fn approve_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        let _: bool = self
            .call("approveChatJoinRequest", &json!({ "chat_id": chat_id, "user_id": user_id }))
            .await?;
        Ok(())
    }

    async fn decline_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        let _: bool = self
            .call("declineChatJoinRequest", &json!({ "chat_id": chat_id, "user_id": user_id }))
            .await?;
        Ok(())
    }

    async fn ban_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut params = json!({ "chat_id": chat_id, "user_id": user_id });
        if let Some(until) = until {
            params["until_date"] = json!(until.timestamp());
        }
        let _: bool = self.call("banChatMember", &params).await?;
        Ok(())
    }

    async fn restrict_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        permissions: ChatPermissions,
    ) -> Result<()> {
        let _: bool = self
            .call(
                "restrictChatMember",
                &json!({
                    "chat_id": chat_id,
                    "user_id": user_id,
                    "permissions": permissions,
                    "use_independent_chat_permissions": true,
                }),
            )
            .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_envelope() {
        let response: ApiResponse<bool> =
            serde_json::from_str(r#"{"ok": false, "error_code": 400, "description": "Bad Request: USER_ALREADY_PARTICIPANT"}"#)
                .unwrap();
        assert!(!response.ok);
        assert!(response.result.is_none());
        assert_eq!(
            response.description.as_deref(),
            Some("Bad Request: USER_ALREADY_PARTICIPANT")
        );
    }

    #[test]
    fn test_api_ok_envelope() {
        let response: ApiResponse<User> = serde_json::from_str(
            r#"{"ok": true, "result": {"id": 99, "is_bot": true, "first_name": "Gate", "username": "gate_bot"}}"#,
        )
        .unwrap();
        assert!(response.ok);
        assert_eq!(response.result.unwrap().username_or_empty(), "gate_bot");
    }
}
