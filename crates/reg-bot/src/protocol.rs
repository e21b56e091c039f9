//! Control messages exchanged with the assignment authority
//!
//! Inbound on the bot channel: `{"action": "assign", "users": [...]}`.
//! Outbound on the controller channel: `{"action": "register", "channel": "bot:..."}`.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::account::Account;

/// Heartbeat announcing a live bot and the channel it listens on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub action: String,
    pub channel: String,
}

impl Heartbeat {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            action: "register".to_string(),
            channel: channel.into(),
        }
    }
}

/// Raw shape of an inbound message before the action is interpreted
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    users: Option<Vec<Value>>,
}

/// An inbound message, classified
#[derive(Debug, Clone, PartialEq)]
pub enum BotCommand {
    /// Authoritative roster replacement
    Assign {
        users: Vec<Account>,
        /// Entries that were not account objects
        rejected: usize,
    },
    /// Well-formed JSON with an action we do not handle (or none)
    Unsupported { action: Option<String> },
}

/// Classify a payload received on the bot channel.
///
/// Fails when the payload is not a JSON object, or when an `assign` carries
/// no `users` list (such a message must not wipe the roster). Entries of
/// `users` that do not decode as accounts are dropped and counted.
pub fn parse_command(payload: &[u8]) -> serde_json::Result<BotCommand> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    match envelope.action.as_deref() {
        Some("assign") => {
            let raw_users = envelope
                .users
                .ok_or_else(|| serde_json::Error::custom("assign without a users list"))?;
            let mut rejected = 0;
            let users = raw_users
                .into_iter()
                .filter_map(|raw| match serde_json::from_value::<Account>(raw) {
                    Ok(account) => Some(account),
                    Err(e) => {
                        warn!("Discarding undecodable account entry: {}", e);
                        rejected += 1;
                        None
                    }
                })
                .collect();
            Ok(BotCommand::Assign { users, rejected })
        }
        _ => Ok(BotCommand::Unsupported {
            action: envelope.action,
        }),
    }
}
