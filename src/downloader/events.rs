//! Fan-out of job lifecycle events to live subscribers.

use tokio::sync::broadcast;
use tracing::trace;

use super::models::DownloadEvent;

/// Capacity of the subscriber ring; slower subscribers lose the oldest events.
const EVENT_BUFFER: usize = 1024;

/// One-way sink for lifecycle events.
///
/// Implementations must never block the caller for long and must never fail:
/// losing an event is preferable to stalling a transfer worker.
pub trait EventNotifier: Send + Sync {
    fn broadcast(&self, event: DownloadEvent);
}

/// Notifier backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<DownloadEvent>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventNotifier for BroadcastNotifier {
    fn broadcast(&self, event: DownloadEvent) {
        // An error only means nobody is listening right now.
        match self.tx.send(event) {
            Ok(receivers) => trace!(receivers, "Event broadcast"),
            Err(_) => trace!("Event dropped, no subscribers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{Category, Job, JobStatus};

    #[tokio::test]
    async fn test_broadcast_without_subscribers_does_not_fail() {
        let notifier = BroadcastNotifier::new();
        let job = Job::new("https://example.com/a.pt", None, Category::Vae);
        notifier.broadcast(DownloadEvent::new(&job, JobStatus::InQueue));
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_events_in_order() {
        let notifier = BroadcastNotifier::new();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        let job = Job::new("https://example.com/a.pt", None, Category::Vae);

        notifier.broadcast(DownloadEvent::new(&job, JobStatus::InQueue));
        notifier.broadcast(DownloadEvent::new(&job, JobStatus::Downloading));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().data.status, JobStatus::InQueue);
            assert_eq!(rx.recv().await.unwrap().data.status, JobStatus::Downloading);
        }
    }
}
