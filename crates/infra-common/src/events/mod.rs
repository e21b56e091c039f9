//! Event distribution between bot workers and the assignment authority

pub mod transport;

pub use transport::{BusMessage, BusSubscription, MemoryBus, MessageBus, NatsBus, NatsConfig};
