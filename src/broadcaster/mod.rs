//! In-memory pub/sub keyed by deployment id, surviving across the worker
//! that publishes and however many live subscribers attach. A per-id entry
//! holds the backlog, a finished flag, and the subscriber set; a single
//! outer mutex guards the id→entry map (small, short-held critical
//! sections only — never held across an `.await` that waits on a
//! subscriber).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

pub const CLEANUP_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum BroadcasterError {
    #[error("deployment {0} is not registered")]
    NotRegistered(i64),
}

/// `None` is the sentinel: the null item a subscriber receives immediately
/// after the final log line, signifying end-of-stream.
pub type LogItem = Option<String>;

struct Entry {
    backlog: Vec<String>,
    finished: bool,
    subscribers: Vec<mpsc::UnboundedSender<LogItem>>,
}

#[derive(Clone)]
pub struct LogBroadcaster {
    entries: Arc<Mutex<HashMap<i64, Entry>>>,
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Must be called before the background worker starts, so a subscriber
    /// racing the worker's first `publish` never sees `NotRegistered`.
    pub async fn register(&self, id: i64) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            id,
            Entry {
                backlog: Vec::new(),
                finished: false,
                subscribers: Vec::new(),
            },
        );
    }

    /// No-op for unregistered ids — a late or mistaken publish after
    /// cleanup must not resurrect an entry or panic the worker.
    pub async fn publish(&self, id: i64, line: String) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&id) {
            entry.backlog.push(line.clone());
            entry.subscribers.retain(|tx| tx.send(Some(line.clone())).is_ok());
        }
    }

    /// Sets finished and enqueues the sentinel on every subscriber's
    /// channel.
    pub async fn finish(&self, id: i64) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&id) {
            entry.finished = true;
            entry.subscribers.retain(|tx| tx.send(None).is_ok());
        }
    }

    /// Returns the backlog snapshot at the moment of subscription plus a
    /// channel that will receive every subsequently published line in
    /// order, then the sentinel. If the deployment already finished, the
    /// channel immediately carries the sentinel so the consumer completes
    /// replay and terminates without waiting on a publisher that will
    /// never run again.
    pub async fn subscribe(
        &self,
        id: i64,
    ) -> Result<(Vec<String>, mpsc::UnboundedReceiver<LogItem>), BroadcasterError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&id).ok_or(BroadcasterError::NotRegistered(id))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = entry.backlog.clone();
        if entry.finished {
            let _ = tx.send(None);
        } else {
            entry.subscribers.push(tx);
        }
        Ok((backlog, rx))
    }

    /// Idempotent: removing a sender that is no longer present is not an
    /// error — a subscriber disconnecting twice (or racing `cleanup`) must
    /// not panic the caller.
    pub async fn unsubscribe(&self, id: i64, tx: &mpsc::UnboundedSender<LogItem>) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&id) {
            entry.subscribers.retain(|s| !s.same_channel(tx));
        }
    }

    pub async fn cleanup(&self, id: i64) {
        self.entries.lock().await.remove(&id);
    }

    /// Schedules `cleanup` on a delay after `finish`, so late subscribers
    /// still get a replay window.
    pub fn schedule_cleanup(&self, id: i64) {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CLEANUP_DELAY).await;
            broadcaster.cleanup(id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_backlog_then_publishes_then_sentinel() {
        let b = LogBroadcaster::new();
        b.register(1).await;
        b.publish(1, "line1".into()).await;

        let (backlog, mut rx) = b.subscribe(1).await.unwrap();
        assert_eq!(backlog, vec!["line1".to_string()]);

        b.publish(1, "line2".into()).await;
        b.finish(1).await;

        assert_eq!(rx.recv().await, Some(Some("line2".to_string())));
        assert_eq!(rx.recv().await, Some(None));
    }

    #[tokio::test]
    async fn subscriber_after_finish_gets_full_backlog_then_sentinel_immediately() {
        let b = LogBroadcaster::new();
        b.register(2).await;
        b.publish(2, "a".into()).await;
        b.publish(2, "b".into()).await;
        b.finish(2).await;

        let (backlog, mut rx) = b.subscribe(2).await.unwrap();
        assert_eq!(backlog, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(rx.recv().await, Some(None));
    }

    #[tokio::test]
    async fn subscribe_unregistered_fails() {
        let b = LogBroadcaster::new();
        assert!(matches!(
            b.subscribe(999).await,
            Err(BroadcasterError::NotRegistered(999))
        ));
    }

    #[tokio::test]
    async fn publish_is_noop_for_unregistered_id() {
        let b = LogBroadcaster::new();
        b.publish(42, "ignored".into()).await; // must not panic
    }
}
