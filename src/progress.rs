//! Typed status events broadcast to observers. Subscribers are best-effort — a slow
//! observer must not block writers.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Scanning,
    Embedding,
    Writing,
    Qdrant,
    Complete,
    Error,
}

impl Phase {
    /// Only `idle`, `complete`, and `error` are terminal states for a batch.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Idle | Phase::Complete | Phase::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub phase: Phase,
    pub total: usize,
    pub done: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qdrant_points: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Status {
    pub fn scanning(message: impl Into<String>) -> Self {
        Status { phase: Phase::Scanning, total: 0, done: 0, last_file: None, qdrant_points: None, message: Some(message.into()), error: None }
    }

    pub fn progress(phase: Phase, done: usize, total: usize, last_file: Option<String>) -> Self {
        Status { phase, total, done, last_file, qdrant_points: None, message: None, error: None }
    }

    pub fn complete(total: usize, qdrant_points: Option<i64>, message: impl Into<String>) -> Self {
        Status {
            phase: Phase::Complete,
            total,
            done: total,
            last_file: None,
            qdrant_points,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Status { phase: Phase::Error, total: 0, done: 0, last_file: None, qdrant_points: None, message: None, error: Some(message.into()) }
    }
}

/// Broadcasts `Status` events to any in-process observer. Construction never fails;
/// publishing never blocks on slow subscribers (the channel drops for them instead).
#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<Status>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.tx.subscribe()
    }

    pub fn publish(&self, status: Status) {
        // No receivers is not an error — publishing is fire-and-forget.
        let _ = self.tx.send(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        assert!(Phase::Idle.is_terminal());
        assert!(Phase::Complete.is_terminal());
        assert!(Phase::Error.is_terminal());
        assert!(!Phase::Scanning.is_terminal());
        assert!(!Phase::Embedding.is_terminal());
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = ProgressBus::new(16);
        bus.publish(Status::scanning("test"));
    }

    #[tokio::test]
    async fn subscriber_receives_published_status() {
        let bus = ProgressBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(Status::complete(1, Some(1), "done"));
        let status = rx.recv().await.unwrap();
        assert_eq!(status.phase, Phase::Complete);
    }
}
