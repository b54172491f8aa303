//! Outbound messaging boundary.

use async_trait::async_trait;

use crate::types::SendError;

/// The one seam the engine needs from a messaging platform: deliver text to
/// a chat and get back the platform's message id, or a categorized failure.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, SendError>;
}
