use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::payloads::GetUpdatesSetters;
use teloxide::prelude::*;
use teloxide::types::{ChatId, UpdateKind, User};
use tracing::{debug, info};

use crate::config::TelegramConfig;
use crate::platform::{Event, EventSource, IncomingMessage, Notifier};

/// Telegram refuses larger batches
const MAX_BATCH: usize = 100;

/// Telegram Bot API client used both as the event source and the notifier
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
    poll_timeout_secs: u32,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        // The HTTP timeout has to outlive the long poll
        let client = teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(u64::from(config.poll_timeout_secs) + 10))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        info!(
            "Telegram client ready (long poll timeout {}s)",
            config.poll_timeout_secs
        );

        Ok(Self {
            bot: Bot::with_client(&config.bot_token, client),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }
}

#[async_trait]
impl EventSource for TelegramClient {
    async fn fetch(&self, offset: i64, limit: usize) -> Result<Vec<Event>> {
        let offset = i32::try_from(offset)
            .with_context(|| format!("Update offset {} is out of range", offset))?;
        let limit = limit.clamp(1, MAX_BATCH) as u8;

        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .limit(limit)
            .timeout(self.poll_timeout_secs)
            .await
            .context("Failed to get updates")?;

        debug!("Fetched {} update(s) at offset {}", updates.len(), offset);

        Ok(updates.into_iter().map(to_event).collect())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .with_context(|| format!("Failed to send message to chat {}", chat_id))?;
        Ok(())
    }
}

fn to_event(update: Update) -> Event {
    let id = i64::from(update.id.0);
    let message = match update.kind {
        UpdateKind::Message(msg) => to_incoming(&msg),
        _ => None,
    };
    Event { id, message }
}

fn to_incoming(msg: &Message) -> Option<IncomingMessage> {
    let text = msg.text()?;
    let user = msg.from.as_ref()?;

    Some(IncomingMessage {
        chat_id: msg.chat.id.0,
        text: text.to_string(),
        sender_name: sender_name(user),
    })
}

/// Username when the account has one, the numeric id otherwise
fn sender_name(user: &User) -> String {
    match &user.username {
        Some(username) if !username.is_empty() => username.clone(),
        _ => user.id.0.to_string(),
    }
}
