//! Publish/subscribe transport abstractions for distributed bot coordination
//!
//! This module provides the trait and implementations for the message bus
//! used between bot workers and the assignment authority.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::Result;

pub mod memory;
pub mod nats;

pub use memory::MemoryBus;
pub use nats::{NatsBus, NatsConfig};

/// A message delivered on a subscribed channel
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Channel (subject) the message was published to
    pub channel: String,
    /// Raw payload
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Message bus trait for channel-addressed publish/subscribe
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a channel
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to a channel
    async fn subscribe(&self, channel: &str) -> Result<BusSubscription>;
}

/// Receiver for bus messages
pub struct BusSubscription {
    receiver: Box<dyn SubscriptionImpl>,
}

impl BusSubscription {
    /// Create a new subscription from a backend receiver
    pub fn new(receiver: Box<dyn SubscriptionImpl>) -> Self {
        Self { receiver }
    }

    /// Receive the next message; `None` once the subscription is closed
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

/// Internal trait for subscription implementations
#[async_trait]
pub trait SubscriptionImpl: Send {
    /// Receive the next message
    async fn recv(&mut self) -> Option<BusMessage>;
}
