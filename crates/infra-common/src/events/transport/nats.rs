//! NATS transport implementation for distributed bot coordination
//!
//! Channel names map one-to-one onto NATS subjects. Reconnection and
//! backpressure are owned by the `async-nats` client; connection state changes
//! are surfaced as log lines.

use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BusMessage, BusSubscription, MessageBus, SubscriptionImpl};
use crate::errors::{ErrorContext, ErrorExt, Result};

/// Connection settings for a NATS server
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Client name reported to the server
    pub client_name: String,
    /// Optional credentials
    pub user: Option<String>,
    /// Optional credentials
    pub password: Option<String>,
    /// Initial connect timeout
    pub connect_timeout: Duration,
}

impl NatsConfig {
    /// Create a configuration for the given server
    pub fn new(url: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_name: client_name.into(),
            user: None,
            password: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Authenticate with username and password
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

/// NATS-backed message bus
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Connect to the configured server
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let mut options = ConnectOptions::new()
            .name(&config.client_name)
            .connection_timeout(config.connect_timeout)
            .event_callback(|event| async move {
                info!("nats event {}", event);
            });

        if let (Some(user), Some(pass)) = (&config.user, &config.password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(config.url.as_str())
            .await
            .transport_context(ErrorContext::new("nats", "connect"))?;

        info!("Connected to NATS at {}", config.url);
        Ok(Self { client })
    }

    /// Wrap an already connected client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Underlying client, shared with the key-value backend
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(channel.to_string(), payload)
            .await
            .transport_context(ErrorContext::new("nats", "publish"))
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription> {
        let subscriber = self
            .client
            .subscribe(channel.to_string())
            .await
            .transport_context(ErrorContext::new("nats", "subscribe"))?;
        debug!("Subscribed to {}", channel);
        Ok(BusSubscription::new(Box::new(NatsReceiver { subscriber })))
    }
}

struct NatsReceiver {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl SubscriptionImpl for NatsReceiver {
    async fn recv(&mut self) -> Option<BusMessage> {
        let message = self.subscriber.next().await;
        if message.is_none() {
            warn!("NATS subscription closed");
        }
        message.map(|m| BusMessage::new(m.subject.to_string(), m.payload))
    }
}
