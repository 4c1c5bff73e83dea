use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};
use url::Url;

use crate::limiter::RateLimiter;
use crate::messages;
use crate::platform::{Event, IncomingMessage, Notifier};
use crate::storage::{Page, PageStore, SaveOutcome, StoreError};

/// What an incoming text asks the bot to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A link, kept exactly as the user sent it
    AddPage(String),
    Start,
    Random,
    Help,
    Unknown,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();

        if let Some(url) = parse_link(text) {
            return Command::AddPage(url);
        }

        let Some(token) = text.strip_prefix('/') else {
            return Command::Unknown;
        };
        // Commands in group chats arrive as /help@botname
        let token = token.split_once('@').map_or(token, |(name, _)| name);

        match token {
            "start" => Command::Start,
            "random" | "rnd" => Command::Random,
            "help" => Command::Help,
            _ => Command::Unknown,
        }
    }

    /// Human readable name used in error context
    fn describe(&self) -> &'static str {
        match self {
            Command::AddPage(_) => "save page",
            Command::Start => "start",
            Command::Random => "send random page",
            Command::Help => "help",
            Command::Unknown => "unknown command",
        }
    }
}

/// The text itself when it is a single absolute URL with a host.
///
/// `Url::parse` drops tabs and newlines and escapes spaces, so text carrying
/// any of them is rejected up front instead of being rewritten into a link.
fn parse_link(text: &str) -> Option<String> {
    if text.is_empty() || text.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return None;
    }
    let url = Url::parse(text).ok()?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Some(text.to_string()),
        _ => None,
    }
}

/// Routes one event to its handler
pub struct Dispatcher {
    store: Arc<dyn PageStore>,
    notifier: Arc<dyn Notifier>,
    limiter: RateLimiter,
    limit_links: bool,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn PageStore>,
        notifier: Arc<dyn Notifier>,
        limiter: RateLimiter,
        limit_links: bool,
    ) -> Self {
        Self {
            store,
            notifier,
            limiter,
            limit_links,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Handle a single event. Domain outcomes (duplicates, empty lists,
    /// rate limiting) are answered to the user and reported as `Ok`.
    pub async fn process(&self, event: &Event) -> Result<()> {
        let msg = event
            .message
            .as_ref()
            .ok_or_else(|| anyhow!("can't process event {}: unknown event type", event.id))?;

        let text = msg.text.trim();
        info!("Got new command '{}' from '{}'", text, msg.sender_name);

        let command = Command::parse(text);

        let limited = !matches!(command, Command::AddPage(_)) || self.limit_links;
        if limited && !self.limiter.allow(msg.chat_id).await {
            warn!(
                "Rejected '{}' from '{}' (chat {}): too many requests",
                text, msg.sender_name, msg.chat_id
            );
            return self
                .notifier
                .send(msg.chat_id, messages::TOO_MANY_REQUESTS)
                .await
                .context("can't notify about rate limit");
        }

        let result = match &command {
            Command::AddPage(url) => self.save_page(msg, url).await,
            Command::Start => self.register_user(msg).await,
            Command::Random => self.send_random(msg).await,
            Command::Help => self.notifier.send(msg.chat_id, messages::HELP).await,
            Command::Unknown => {
                self.notifier
                    .send(msg.chat_id, messages::UNKNOWN_COMMAND)
                    .await
            }
        };

        result.with_context(|| format!("can't do command: {}", command.describe()))
    }

    async fn register_user(&self, msg: &IncomingMessage) -> Result<()> {
        let exists = self
            .store
            .user_exists(&msg.sender_name)
            .await
            .context("can't check if user exists")?;

        if !exists {
            let id = self
                .store
                .create_user(&msg.sender_name)
                .await
                .context("can't register user")?;
            info!("Registered user '{}' ({})", msg.sender_name, id);
        }

        self.notifier.send(msg.chat_id, &messages::greeting()).await
    }

    async fn save_page(&self, msg: &IncomingMessage, url: &str) -> Result<()> {
        let page = Page::new(url, &msg.sender_name);

        if self.store.page_exists(&page).await? {
            return self
                .notifier
                .send(msg.chat_id, messages::ALREADY_EXISTS)
                .await;
        }

        match self.store.save_page(&page).await? {
            SaveOutcome::Saved => {
                info!("Saved {} for '{}'", page.url, page.user_name);
                self.notifier.send(msg.chat_id, messages::SAVED).await
            }
            SaveOutcome::AlreadyExists => {
                self.notifier
                    .send(msg.chat_id, messages::ALREADY_EXISTS)
                    .await
            }
        }
    }

    async fn send_random(&self, msg: &IncomingMessage) -> Result<()> {
        let page = match self.store.pick_random_page(&msg.sender_name).await {
            Ok(page) => page,
            Err(StoreError::NoSavedPages) => {
                return self
                    .notifier
                    .send(msg.chat_id, messages::NO_SAVED_PAGES)
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        // The page is only dropped once the user actually has it
        self.notifier
            .send(msg.chat_id, &messages::random_page(&page))
            .await?;
        self.store.remove_page(&page).await?;

        Ok(())
    }
}
