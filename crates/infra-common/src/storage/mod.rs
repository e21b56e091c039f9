//! Shared key-value storage backends
//!
//! Bot workers only ever write records here; other systems read them.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::Result;

pub mod memory;
pub mod nats;

pub use memory::MemoryStore;
pub use nats::NatsKvStore;

/// Write-side of a shared key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;
}
