//! Common infrastructure for the reg-bot workers
//!
//! - [`logging`]: tracing subscriber bootstrap
//! - [`errors`]: shared error type and backend error context
//! - [`events`]: channel-addressed publish/subscribe ([`MemoryBus`], [`NatsBus`])
//! - [`storage`]: write-only key-value backends ([`MemoryStore`], [`NatsKvStore`])

pub mod errors;
pub mod events;
pub mod logging;
pub mod storage;

pub use errors::{Error, Result};
pub use events::{BusMessage, BusSubscription, MemoryBus, MessageBus, NatsBus, NatsConfig};
pub use storage::{KeyValueStore, MemoryStore, NatsKvStore};
