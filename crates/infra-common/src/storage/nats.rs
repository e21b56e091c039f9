//! JetStream key-value backend

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use super::KeyValueStore;
use crate::errors::{ErrorContext, ErrorExt, Result};

/// Key-value store on a JetStream bucket
#[derive(Clone)]
pub struct NatsKvStore {
    store: kv::Store,
}

impl NatsKvStore {
    /// Open `bucket`, creating it when it does not exist yet
    pub async fn open(client: async_nats::Client, bucket: &str) -> Result<Self> {
        let context = jetstream::new(client);
        let store = match context.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => {
                info!("Creating key-value bucket {}", bucket);
                context
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        ..Default::default()
                    })
                    .await
                    .storage_context(ErrorContext::new("jetstream", "create bucket"))?
            }
        };
        Ok(Self { store })
    }
}

/// Map a key onto the JetStream key alphabet `[-/_=.a-zA-Z0-9]`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '/' | '_' | '=' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[async_trait]
impl KeyValueStore for NatsKvStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.store
            .put(sanitize_key(key), value)
            .await
            .storage_context(ErrorContext::new("jetstream", "put"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("regbot.account.15551234567"), "regbot.account.15551234567");
        assert_eq!(sanitize_key("regbot:account:+1 555"), "regbot_account__1_555");
    }
}
