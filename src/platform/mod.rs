pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// A text message received from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Chat the reply goes to
    pub chat_id: i64,
    /// The message text, untrimmed
    pub text: String,
    /// Stable name of the sender, used as the page owner
    pub sender_name: String,
}

/// One entry of the platform's update stream.
///
/// Updates that are not text messages still arrive as events (with
/// `message: None`) so the consumer can move its offset past them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Position of this update in the stream
    pub id: i64,
    pub message: Option<IncomingMessage>,
}

/// Source of inbound events, read by offset
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch up to `limit` events starting at `offset`, in stream order.
    async fn fetch(&self, offset: i64, limit: usize) -> Result<Vec<Event>>;
}

/// Outbound text channel back to a chat
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()>;
}
