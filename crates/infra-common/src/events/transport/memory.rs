//! In-process message bus
//!
//! Mirrors pub/sub semantics of the networked backends: messages published to
//! a channel nobody is subscribed to are dropped.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use super::{BusMessage, BusSubscription, MessageBus, SubscriptionImpl};
use crate::errors::Result;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast-backed bus shared by cloning
#[derive(Clone)]
pub struct MemoryBus {
    channels: Arc<DashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl MemoryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an empty bus with a per-channel buffer size
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscribers on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        if let Some(tx) = self.channels.get(channel) {
            // No receivers is not an error on a pub/sub bus
            let _ = tx.send(BusMessage::new(channel, payload));
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription> {
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Ok(BusSubscription::new(Box::new(MemoryReceiver {
            channel: channel.to_string(),
            rx,
        })))
    }
}

struct MemoryReceiver {
    channel: String,
    rx: broadcast::Receiver<BusMessage>,
}

#[async_trait]
impl SubscriptionImpl for MemoryReceiver {
    async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscriber on {} lagged, {} messages dropped", self.channel, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
