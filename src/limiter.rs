use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::RateLimitConfig;

/// Per-chat burst tracking
#[derive(Debug, Clone, Copy)]
struct ChatWindow {
    last_seen: Instant,
    cooldown_until: Option<Instant>,
}

/// Per-chat spam guard.
///
/// A chat may send as fast as it likes as long as two consecutive accepted
/// messages are at least `burst_window` apart. A message arriving inside the
/// window puts the chat into cooldown, and everything from that chat is
/// rejected until the cooldown runs out.
pub struct RateLimiter {
    burst_window: Duration,
    cooldown: Duration,
    idle_eviction: Duration,
    chats: Mutex<HashMap<i64, ChatWindow>>,
}

impl RateLimiter {
    pub fn new(burst_window: Duration, cooldown: Duration, idle_eviction: Duration) -> Self {
        Self {
            burst_window,
            cooldown,
            idle_eviction,
            chats: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.burst_window(),
            config.cooldown(),
            config.idle_eviction(),
        )
    }

    /// How long an untouched chat is kept before `sweep` may drop it
    pub fn idle_eviction(&self) -> Duration {
        self.idle_eviction
    }

    /// Check whether a message from `chat_id` should be processed now
    pub async fn allow(&self, chat_id: i64) -> bool {
        self.allow_at(chat_id, Instant::now()).await
    }

    /// Same as [`RateLimiter::allow`] with an explicit clock
    pub async fn allow_at(&self, chat_id: i64, now: Instant) -> bool {
        let mut chats = self.chats.lock().await;

        let window = match chats.entry(chat_id) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                slot.insert(ChatWindow {
                    last_seen: now,
                    cooldown_until: None,
                });
                debug!("First message from chat {}", chat_id);
                return true;
            }
        };

        if let Some(until) = window.cooldown_until {
            if now < until {
                debug!("Chat {} is in cooldown until {:?}", chat_id, until);
                return false;
            }
            window.cooldown_until = None;
        }

        if now.saturating_duration_since(window.last_seen) < self.burst_window {
            window.cooldown_until = Some(now + self.cooldown);
            info!(
                "Spam detected for chat {}, cooling down for {:?}",
                chat_id, self.cooldown
            );
            return false;
        }

        window.last_seen = now;
        true
    }

    /// Drop chats idle for longer than the eviction period.
    /// Chats still serving a cooldown are kept.
    pub async fn sweep(&self, now: Instant) -> usize {
        let mut chats = self.chats.lock().await;
        let before = chats.len();

        chats.retain(|_, window| {
            let cooling = window.cooldown_until.is_some_and(|until| now < until);
            cooling || now.saturating_duration_since(window.last_seen) < self.idle_eviction
        });

        let removed = before - chats.len();
        if removed > 0 {
            info!(
                "Evicted {} idle chat(s) from rate limiter, {} remaining",
                removed,
                chats.len()
            );
        }
        removed
    }

    /// Number of chats currently tracked
    pub async fn tracked_chats(&self) -> usize {
        self.chats.lock().await.len()
    }
}
