use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::config::ConsumerConfig;
use crate::dispatcher::Dispatcher;
use crate::platform::EventSource;

/// What a single poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing pending
    Idle,
    /// The source could not be reached; the offset was left alone
    FetchFailed,
    /// A batch was handed to the dispatcher
    Dispatched { events: usize, failed: usize },
}

/// Pulls batches of events from the source and feeds them to the dispatcher,
/// one at a time and in stream order.
pub struct Consumer {
    source: Arc<dyn EventSource>,
    dispatcher: Dispatcher,
    batch_size: usize,
    idle_delay: Duration,
    retry_delay: Duration,
    offset: i64,
    last_sweep: Instant,
}

impl Consumer {
    pub fn new(
        source: Arc<dyn EventSource>,
        dispatcher: Dispatcher,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            source,
            dispatcher,
            batch_size: config.batch_size,
            idle_delay: config.idle_delay(),
            retry_delay: config.retry_delay(),
            offset: config.initial_offset,
            last_sweep: Instant::now(),
        }
    }

    /// Next position to fetch from
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Poll forever. Fetch failures and per-event errors are logged and
    /// never stop the loop.
    pub async fn run(&mut self) {
        loop {
            let delay = match self.poll_once().await {
                PollOutcome::Idle => Some(self.idle_delay),
                PollOutcome::FetchFailed => Some(self.retry_delay),
                PollOutcome::Dispatched { events, failed } => {
                    if failed > 0 {
                        warn!("{} of {} event(s) in the batch failed", failed, events);
                    }
                    None
                }
            };

            self.sweep_if_due(Instant::now()).await;

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Fetch one batch, dispatch every event in it, then move the offset past it.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let events = match self.source.fetch(self.offset, self.batch_size).await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to fetch events at offset {}: {:#}", self.offset, e);
                return PollOutcome::FetchFailed;
            }
        };

        if events.is_empty() {
            return PollOutcome::Idle;
        }

        let mut failed = 0;
        for event in &events {
            if let Err(e) = self.dispatcher.process(event).await {
                failed += 1;
                error!("Failed to process event {}: {:#}", event.id, e);
            }
        }

        // Dense streams advance by the batch length, sparse ones (Telegram
        // update ids) past the last id seen
        let by_count = self.offset.saturating_add(events.len() as i64);
        let past_last = events
            .last()
            .map_or(by_count, |event| event.id.saturating_add(1));
        self.offset = by_count.max(past_last);

        debug!(
            "Handled {} event(s), {} failed, next offset {}",
            events.len(),
            failed,
            self.offset
        );

        PollOutcome::Dispatched {
            events: events.len(),
            failed,
        }
    }

    async fn sweep_if_due(&mut self, now: Instant) {
        let limiter = self.dispatcher.limiter();
        if now.saturating_duration_since(self.last_sweep) < limiter.idle_eviction() {
            return;
        }
        limiter.sweep(now).await;
        debug!("Rate limiter tracks {} chat(s)", limiter.tracked_chats().await);
        self.last_sweep = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::RateLimiter;
    use crate::messages;
    use crate::platform::fakes::{RecordingNotifier, ScriptedSource};
    use crate::platform::Event;
    use crate::storage::sqlite::SqliteStore;
    use crate::storage::title::NoTitles;

    struct Harness {
        source: Arc<ScriptedSource>,
        notifier: Arc<RecordingNotifier>,
        consumer: Consumer,
    }

    fn harness(initial_offset: i64) -> Harness {
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(SqliteStore::open_in_memory(Arc::new(NoTitles)).unwrap());
        let limiter = RateLimiter::new(
            Duration::ZERO,
            Duration::from_secs(10),
            Duration::from_secs(600),
        );
        let dispatcher = Dispatcher::new(store, notifier.clone(), limiter, false);
        let config = ConsumerConfig {
            batch_size: 25,
            idle_delay_ms: 10,
            retry_delay_ms: 10,
            initial_offset,
        };
        let consumer = Consumer::new(source.clone(), dispatcher, &config);

        Harness {
            source,
            notifier,
            consumer,
        }
    }

    #[tokio::test]
    async fn test_empty_batch_keeps_offset() {
        let mut h = harness(0);

        assert_eq!(h.consumer.poll_once().await, PollOutcome::Idle);
        assert_eq!(h.consumer.offset(), 0);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(h.source.requests(), vec![(0, 25)]);
    }

    #[tokio::test]
    async fn test_batch_advances_offset_by_length() {
        let mut h = harness(0);
        h.source.push_batch(vec![
            Event::message(0, 1, "/help", "alice"),
            Event::message(1, 2, "/help", "bob"),
            Event::message(2, 3, "/help", "carol"),
        ]);

        assert_eq!(
            h.consumer.poll_once().await,
            PollOutcome::Dispatched {
                events: 3,
                failed: 0
            }
        );
        assert_eq!(h.consumer.offset(), 3);

        let chats: Vec<i64> = h.notifier.sent().into_iter().map(|(c, _)| c).collect();
        assert_eq!(chats, vec![1, 2, 3]);

        h.consumer.poll_once().await;
        assert_eq!(h.source.requests(), vec![(0, 25), (3, 25)]);
    }

    #[tokio::test]
    async fn test_sparse_ids_advance_past_last() {
        let mut h = harness(500);
        h.source.push_batch(vec![
            Event::message(500, 1, "/help", "alice"),
            Event::message(503, 1, "/start", "alice"),
        ]);

        h.consumer.poll_once().await;
        assert_eq!(h.consumer.offset(), 504);
    }

    #[tokio::test]
    async fn test_failing_event_does_not_stop_batch() {
        let mut h = harness(0);
        h.source.push_batch(vec![
            Event::message(0, 1, "https://example.com/a", "alice"),
            Event {
                id: 1,
                message: None,
            },
            Event::message(2, 1, "/help", "alice"),
        ]);

        assert_eq!(
            h.consumer.poll_once().await,
            PollOutcome::Dispatched {
                events: 3,
                failed: 1
            }
        );
        assert_eq!(h.consumer.offset(), 3);

        let texts: Vec<String> = h.notifier.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(
            texts,
            vec![messages::SAVED.to_string(), messages::HELP.to_string()]
        );
    }

    #[tokio::test]
    async fn test_fetch_error_retries_same_offset() {
        let mut h = harness(7);
        h.source.push_error("connection reset");
        h.source.push_batch(vec![Event::message(7, 1, "/help", "alice")]);

        assert_eq!(h.consumer.poll_once().await, PollOutcome::FetchFailed);
        assert_eq!(h.consumer.offset(), 7);

        h.consumer.poll_once().await;
        assert_eq!(h.consumer.offset(), 8);
        assert_eq!(h.source.requests(), vec![(7, 25), (7, 25)]);
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_run_keeps_polling_after_errors() {
        let mut h = harness(0);
        h.source.push_error("boom");
        h.source.push_batch(vec![Event::message(0, 1, "/help", "alice")]);

        let _ = tokio::time::timeout(Duration::from_millis(200), h.consumer.run()).await;

        assert!(h.source.calls() >= 3);
        assert_eq!(h.consumer.offset(), 1);
        assert_eq!(h.notifier.last_text().as_deref(), Some(messages::HELP));
    }

    #[tokio::test]
    async fn test_sweep_runs_when_due() {
        let mut h = harness(0);
        h.source.push_batch(vec![Event::message(0, 1, "/help", "alice")]);
        h.consumer.poll_once().await;
        assert_eq!(h.consumer.dispatcher.limiter().tracked_chats().await, 1);

        let start = h.consumer.last_sweep;
        h.consumer.sweep_if_due(start + Duration::from_secs(60)).await;
        assert_eq!(h.consumer.dispatcher.limiter().tracked_chats().await, 1);

        h.consumer
            .sweep_if_due(Instant::now() + Duration::from_secs(601))
            .await;
        assert_eq!(h.consumer.dispatcher.limiter().tracked_chats().await, 0);
    }
}
