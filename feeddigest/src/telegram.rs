//! Telegram Bot API client: outbound messages plus long-poll `getUpdates`.

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::delivery::{ChatId, ChatTransport, DeliveryError, MessageId};

pub struct TelegramTransport {
    base_url: String,
    client: reqwest::Client,
    poll_timeout_secs: u64,
    disable_web_page_preview: bool,
}

/// One inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub update_id: i64,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
}

impl TelegramTransport {
    pub fn new(api_url: &str, token: &str, poll_timeout_secs: u64, disable_web_page_preview: bool) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 10))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            client,
            poll_timeout_secs,
            disable_web_page_preview,
        })
    }

    /// Build from the `[telegram]` section, reading the token from the configured env var.
    pub fn from_config(cfg: &common::TelegramConfig) -> anyhow::Result<Self> {
        let token_env = cfg.token_env.as_deref().unwrap_or("TELEGRAM_TOKEN");
        let token = std::env::var(token_env)
            .with_context(|| format!("Telegram token env var '{}' not set", token_env))?;
        Self::new(
            cfg.api_url.as_deref().unwrap_or("https://api.telegram.org"),
            &token,
            cfg.poll_timeout_seconds.unwrap_or(30),
            cfg.disable_web_page_preview.unwrap_or(true),
        )
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(&self, method: &str, body: &B) -> Result<T, DeliveryError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await?;

        let envelope: ApiResponse<T> = response.json().await?;
        match (envelope.ok, envelope.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(DeliveryError::Api {
                code: envelope.error_code.unwrap_or(0),
                description: envelope.description.unwrap_or_else(|| format!("{} failed", method)),
            }),
        }
    }

    /// Long-poll for updates after `offset`. Non-text updates are acknowledged but skipped.
    pub async fn get_updates(&self, offset: i64) -> Result<(Vec<IncomingMessage>, i64), DeliveryError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        let updates: Vec<Update> = self.call("getUpdates", &body).await?;

        let next_offset = updates.iter().map(|u| u.update_id + 1).max().unwrap_or(offset);
        let messages = updates
            .into_iter()
            .filter_map(|u| {
                let message = u.message?;
                Some(IncomingMessage {
                    update_id: u.update_id,
                    chat_id: message.chat.id,
                    message_id: message.message_id,
                    text: message.text?,
                })
            })
            .collect();
        Ok((messages, next_offset))
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, DeliveryError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": self.disable_web_page_preview,
        });
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        // Result is the edited Message, or `true` for inline messages
        let _: serde_json::Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), DeliveryError> {
        let body = serde_json::json!({ "chat_id": chat_id, "message_id": message_id });
        let _: bool = self.call("deleteMessage", &body).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: MessageId,
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: ChatId,
}
