//! Event consumers.
//!
//! Dispatch is synchronous: every notification produced by a mutation is
//! delivered before the mutating call returns, with no lock held, so a
//! consumer may call back into the knowledge base. Consumers that are slow
//! should use a [`ChannelConsumer`] and drain its [`WatchStream`] elsewhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::types::WatchEvent;

/// Receives watcher notifications.
///
/// A panic in `consume_event` is caught and logged by the dispatcher. The
/// event is lost for that consumer; later deliveries and the mutating call
/// are unaffected.
pub trait EventConsumer: Send + Sync {
    /// Called once per event, on the thread that made the mutation.
    fn consume_event(&self, event: &WatchEvent);
}

impl<F> EventConsumer for F
where
    F: Fn(&WatchEvent) + Send + Sync,
{
    fn consume_event(&self, event: &WatchEvent) {
        self(event);
    }
}

/// Forwards events into a bounded channel and never blocks the notifier.
///
/// When the channel is full or the stream was dropped, the event is counted
/// as dropped.
#[derive(Debug)]
pub struct ChannelConsumer {
    tx: Sender<WatchEvent>,
    dropped: AtomicU64,
}

impl ChannelConsumer {
    /// Creates a consumer and the stream that drains it.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Arc<Self>, WatchStream) {
        let (tx, rx) = bounded::<WatchEvent>(capacity.max(1));
        let consumer = Arc::new(Self {
            tx,
            dropped: AtomicU64::new(0),
        });
        (consumer, WatchStream { rx })
    }

    /// Events lost to a full or disconnected stream.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventConsumer for ChannelConsumer {
    fn consume_event(&self, event: &WatchEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Receiving side of a [`ChannelConsumer`].
#[derive(Debug)]
pub struct WatchStream {
    rx: Receiver<WatchEvent>,
}

impl WatchStream {
    /// Blocks until the next event. `None` once the consumer is gone.
    pub fn recv(&self) -> Option<WatchEvent> {
        self.rx.recv().ok()
    }

    /// Waits at most `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WatchEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Every event queued right now.
    pub fn drain(&self) -> Vec<WatchEvent> {
        self.rx.try_iter().collect()
    }

    /// Events waiting in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when no event is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::watch::types::{EventKind, WatcherId};

    fn event() -> WatchEvent {
        WatchEvent::new(WatcherId::new(), EventKind::BecameTrue, Vec::new(), Utc::now())
    }

    #[test]
    fn closures_are_consumers() {
        let seen = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&seen);
        let consumer = move |_: &WatchEvent| {
            s.fetch_add(1, Ordering::SeqCst);
        };
        consumer.consume_event(&event());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (consumer, stream) = ChannelConsumer::bounded(2);
        for _ in 0..5 {
            consumer.consume_event(&event());
        }
        assert_eq!(stream.len(), 2);
        assert_eq!(consumer.dropped_events(), 3);
        assert_eq!(stream.drain().len(), 2);
        assert!(stream.recv_timeout(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn dropped_stream_counts_as_dropped() {
        let (consumer, stream) = ChannelConsumer::bounded(4);
        drop(stream);
        consumer.consume_event(&event());
        assert_eq!(consumer.dropped_events(), 1);
    }
}
