//! In-process fan-out from log channels to connected viewers.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::debug;

/// Per-channel buffer; a viewer further behind than this skips ahead.
pub const DEFAULT_CAPACITY: usize = 1024;

type Channels = HashMap<String, broadcast::Sender<String>>;

/// Channel name to broadcast sender, created on first join.
pub struct RelayHub {
    channels: RwLock<Channels>,
    capacity: usize,
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RelayHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Join a channel. Only messages forwarded after this call are received.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        if let Some(sender) = self.read().get(channel) {
            return sender.subscribe();
        }
        let mut channels = self.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Forward a payload verbatim to everyone on `channel`; returns how many
    /// viewers it reached.
    pub fn forward(&self, channel: &str, payload: String) -> usize {
        let delivered = match self.read().get(channel) {
            Some(sender) => sender.send(payload).unwrap_or(0),
            None => return 0,
        };
        if delivered == 0 {
            self.prune(channel);
        }
        debug!(channel, delivered, "forwarded log message");
        delivered
    }

    pub fn channel_count(&self) -> usize {
        self.read().len()
    }

    pub fn viewer_count(&self, channel: &str) -> usize {
        self.read()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop a channel nobody is listening to any more.
    fn prune(&self, channel: &str) {
        let mut channels = self.write();
        if channels
            .get(channel)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(channel);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Channels> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Channels> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }
}
