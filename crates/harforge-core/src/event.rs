//! Event bus between the sync watcher and its consumers, using tokio::broadcast
//!
//! Publishing never blocks the watcher task; slow subscribers lag and are
//! told how many events they missed.

use std::path::PathBuf;
use tokio::sync::broadcast;

/// Events emitted by a sync session
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Watching began; mirroring into the given destination
    Started { dest: PathBuf },
    /// A sync pass committed its changes to the destination
    PassCompleted { copied: usize, removed: usize },
    /// A sync pass failed; the watcher keeps running
    PassFailed(String),
    /// The watch backend reported an error
    WatchError(String),
    /// The session was stopped
    Stopped,
}

/// Event bus for broadcasting sync events
///
/// Uses tokio::broadcast for multi-consumer support: the run controller
/// forwards to its notification sink, tests subscribe directly.
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: SyncEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
