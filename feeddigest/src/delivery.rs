use async_trait::async_trait;
use thiserror::Error;

/// Chat identifier, as used by the transport.
pub type ChatId = i64;
/// Message identifier within a chat.
pub type MessageId = i64;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport request failed: {0}")]
    Http(String),

    #[error("transport rejected request ({code}): {description}")]
    Api { code: i64, description: String },

    #[error("failed to decode transport response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            DeliveryError::Decode(error.to_string())
        } else {
            DeliveryError::Http(error.to_string())
        }
    }
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, DeliveryError>;

    async fn edit_message(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<(), DeliveryError>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), DeliveryError>;
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Concatenating the chunks yields `text` exactly. A chunk ends after the last newline in the
/// second half of its window when there is one, otherwise at the limit.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let window_end = match rest.char_indices().nth(max_chars) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(rest.to_string());
                break;
            }
        };

        let window = &rest[..window_end];
        let half = window.char_indices().nth(max_chars / 2).map(|(i, _)| i).unwrap_or(0);
        let cut = match window.rfind('\n') {
            Some(nl) if nl >= half => nl + 1,
            _ => window_end,
        };

        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    chunks
}

/// Send every chunk in order, stopping at the first failure.
pub async fn deliver_chunks(
    transport: &dyn ChatTransport,
    chat_id: ChatId,
    text: &str,
    max_chars: usize,
) -> Result<usize, DeliveryError> {
    let chunks = split_message(text, max_chars);
    for (i, chunk) in chunks.iter().enumerate() {
        transport.send_message(chat_id, chunk).await.map_err(|e| {
            tracing::error!(chat_id, chunk = i + 1, total = chunks.len(), error = %e, "failed to deliver chunk");
            e
        })?;
    }
    Ok(chunks.len())
}
