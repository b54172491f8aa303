//! Telegram Bot API boundary — long polling for inbound messages, sends with
//! categorized failures.
//!
//! Outbound failures are mapped to the engine's `SendError` taxonomy so
//! callers can tell permanent rejections (blocked, chat gone) from conditions
//! worth retrying on a later tick (throttling, network).

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use nudge_core::error::{NudgeError, Result};
use nudge_core::types::{Inbound, SendError};
use nudge_core::MessageChannel;

/// Thin client over the Bot API. Cloning shares the underlying HTTP pool.
#[derive(Clone)]
pub struct TelegramApi {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    /// Get bot info; used at startup to verify the token.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| NudgeError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| NudgeError::Channel(format!("Invalid getMe response: {e}")))?;
        body.result
            .ok_or_else(|| NudgeError::Channel("No bot info".into()))
    }

    /// Deliver text to a chat. Returns the platform message id, or a
    /// categorized failure. Never retries; retry policy belongs to callers.
    pub async fn send_text(&self, chat_id: i64, text: &str) -> std::result::Result<i64, SendError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Transient(format!("sendMessage failed: {e}")))?;

        let result: TelegramApiResponse<TelegramMessage> = response
            .json()
            .await
            .map_err(|e| SendError::Transient(format!("Invalid send response: {e}")))?;

        if !result.ok {
            return Err(categorize_api_error(
                result.error_code.unwrap_or(0),
                result.description.as_deref().unwrap_or(""),
            ));
        }
        result
            .result
            .map(|m| m.message_id)
            .ok_or_else(|| SendError::Transient("send response carried no message".into()))
    }
}

#[async_trait]
impl MessageChannel for TelegramApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> std::result::Result<i64, SendError> {
        self.send_text(chat_id, text).await
    }
}

/// Map a Bot API rejection to the delivery-failure taxonomy.
pub fn categorize_api_error(error_code: i64, description: &str) -> SendError {
    let desc = description.to_ascii_lowercase();
    match error_code {
        403 => SendError::Blocked,
        400 if desc.contains("chat not found") => SendError::ChatNotFound,
        429 => SendError::RateLimited,
        _ => SendError::Transient(format!("telegram error {error_code}: {description}")),
    }
}

/// Long-polling receiver. Consumes itself into a background task feeding an
/// inbound stream.
pub struct TelegramPoller {
    api: TelegramApi,
    last_update_id: i64,
    poll_interval_secs: u64,
}

impl TelegramPoller {
    pub fn new(api: TelegramApi, poll_interval_secs: u64) -> Self {
        Self {
            api,
            last_update_id: 0,
            poll_interval_secs,
        }
    }

    /// Get updates using long polling.
    pub async fn get_updates(&mut self) -> Result<Vec<TelegramUpdate>> {
        let response = self
            .api
            .client
            .get(self.api.api_url("getUpdates"))
            .query(&[
                ("offset", (self.last_update_id + 1).to_string()),
                ("timeout", "30".into()),
                ("allowed_updates", "[\"message\"]".into()),
            ])
            .send()
            .await
            .map_err(|e| NudgeError::Channel(format!("getUpdates failed: {e}")))?;

        let body: TelegramApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| NudgeError::Channel(format!("Invalid Telegram response: {e}")))?;

        if !body.ok {
            return Err(NudgeError::Channel(format!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            )));
        }

        let updates = body.result.unwrap_or_default();
        if let Some(last) = updates.last() {
            self.last_update_id = last.update_id;
        }
        Ok(updates)
    }

    /// Start the polling loop — returns a stream of inbound messages.
    pub fn start_polling(self) -> InboundStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut poller = self;
            tracing::info!("Telegram polling loop started");

            loop {
                match poller.get_updates().await {
                    Ok(updates) => {
                        for update in updates {
                            if let Some(inbound) = update.to_inbound() {
                                if tx.send(inbound).is_err() {
                                    tracing::info!(
                                        "Telegram polling stopped (receiver dropped)"
                                    );
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Telegram polling error: {e}");
                        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    }
                }

                tokio::time::sleep(tokio::time::Duration::from_secs(poller.poll_interval_secs))
                    .await;
            }
        });

        InboundStream { rx }
    }
}

/// Stream of inbound messages from polling.
pub struct InboundStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<Inbound>,
}

impl Stream for InboundStream {
    type Item = Inbound;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Unpin for InboundStream {}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub date: i64,
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

impl TelegramUpdate {
    /// Convert to the engine's inbound shape. Bot-authored and non-text
    /// updates are dropped.
    pub fn to_inbound(&self) -> Option<Inbound> {
        let msg = self.message.as_ref()?;
        let text = msg.text.as_ref()?;
        let from = msg.from.as_ref()?;
        if from.is_bot {
            return None;
        }

        Some(Inbound {
            user_id: msg.chat.id,
            text: text.clone(),
            in_reply_to_message_id: msg.reply_to_message.as_ref().map(|r| r.message_id),
        })
    }
}
