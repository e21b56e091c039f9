//! Assignment controller
//!
//! The [`BotController`] is the bot's single orchestrating task. It
//!
//! - announces the bot on the controller channel immediately and then every
//!   heartbeat interval,
//! - listens on the bot's private channel for `assign` messages,
//! - resolves each reseller domain once and balances accounts over its endpoints,
//! - persists the augmented accounts to the key-value store,
//! - replaces the running session set and starts the new one at a bounded rate.
//!
//! All controller state (resolver cache, roster, session registry) is owned by
//! the controller and mutated only from its run loop, one message at a time.
//!
//! ```rust,no_run
//! use rvoip_reg_bot::{BotConfig, BotController, BotIdentity, HickoryDns, UdpSignalingClient, UdpSignalingConfig};
//! use infra_common::{MemoryBus, MemoryStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let signaling = UdpSignalingClient::bind(UdpSignalingConfig::default()).await?;
//! let controller = BotController::new(
//!     BotIdentity::generate(),
//!     BotConfig::default(),
//!     Arc::new(MemoryBus::new()),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(HickoryDns::from_system_conf()),
//!     Arc::new(signaling),
//! )?;
//! controller.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use infra_common::{KeyValueStore, MessageBus};

use crate::account::{Account, AssignedAccount};
use crate::config::{BotConfig, CHANNEL_PREFIX};
use crate::errors::{BotError, BotResult};
use crate::protocol::{parse_command, BotCommand, Heartbeat};
use crate::registry::SessionRegistry;
use crate::resolver::{DnsLookup, Endpoint, EndpointResolver};
use crate::session::RegistrationSession;
use crate::signaling::SignalingClient;

/// The bot's identity on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    channel: String,
}

impl BotIdentity {
    /// Fresh identity with channel `bot:<uuid>`
    pub fn generate() -> Self {
        Self {
            channel: format!("{}{}", CHANNEL_PREFIX, Uuid::new_v4().simple()),
        }
    }

    /// Identity with a fixed channel name
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    /// Private channel assignments arrive on
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Display for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel)
    }
}

/// What one assignment did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentReport {
    /// Accounts decoded from the message
    pub received: usize,
    /// Entries that did not decode as accounts
    pub rejected: usize,
    /// Accounts missing a username or password
    pub invalid: usize,
    /// Domains with a resolver after this assignment, in roster order
    pub resolved_domains: Vec<String>,
    /// Domains that failed to resolve this time
    pub unresolved_domains: Vec<String>,
    /// Records written to the key-value store
    pub persisted: usize,
    /// Sessions handed to the paced dispatcher
    pub dispatched: usize,
}

/// Orchestrates assignments, resolvers and registration sessions for one bot
pub struct BotController {
    identity: BotIdentity,
    config: Arc<BotConfig>,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn KeyValueStore>,
    dns: Arc<dyn DnsLookup>,
    signaling: Arc<dyn SignalingClient>,
    resolvers: HashMap<String, EndpointResolver>,
    roster: Vec<AssignedAccount>,
    sessions: SessionRegistry,
}

impl BotController {
    pub fn new(
        identity: BotIdentity,
        config: BotConfig,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn KeyValueStore>,
        dns: Arc<dyn DnsLookup>,
        signaling: Arc<dyn SignalingClient>,
    ) -> BotResult<Self> {
        config.validate()?;
        Ok(Self {
            identity,
            config: Arc::new(config),
            bus,
            store,
            dns,
            signaling,
            resolvers: HashMap::new(),
            roster: Vec::new(),
            sessions: SessionRegistry::new(),
        })
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Accounts of the current assignment that passed validation, in roster order
    pub fn roster(&self) -> &[AssignedAccount] {
        &self.roster
    }

    /// Sessions of the current assignment
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Cached resolver for a reseller domain
    pub fn resolver(&self, domain: &str) -> Option<&EndpointResolver> {
        self.resolvers.get(domain)
    }

    /// Publish one heartbeat on the controller channel
    pub async fn announce(&self) -> BotResult<()> {
        let heartbeat = serde_json::to_vec(&Heartbeat::new(self.identity.channel()))?;
        self.bus
            .publish(&self.config.controller_channel, Bytes::from(heartbeat))
            .await?;
        debug!("heartbeat sent to {}", self.config.controller_channel);
        Ok(())
    }

    /// Handle one payload from the bot channel.
    ///
    /// Returns the report when the payload was an assignment.
    pub async fn handle_message(&mut self, payload: &[u8]) -> Option<AssignmentReport> {
        match parse_command(payload) {
            Ok(BotCommand::Assign { users, rejected }) => {
                info!("Received assignment of {} accounts", users.len() + rejected);
                let mut report = self.apply_assignment(users).await;
                report.rejected = rejected;
                Some(report)
            }
            Ok(BotCommand::Unsupported { action }) => {
                info!("Ignoring message with unsupported action {:?}", action);
                None
            }
            Err(e) => {
                error!("Discarding malformed control message: {}", e);
                None
            }
        }
    }

    /// Replace the roster with `accounts` and start registering it
    pub async fn apply_assignment(&mut self, accounts: Vec<Account>) -> AssignmentReport {
        let batch = self.sessions.begin_batch();
        self.roster.clear();

        let mut report = AssignmentReport {
            received: accounts.len(),
            ..Default::default()
        };

        let mut domains: Vec<String> = Vec::new();
        for domain in accounts.iter().filter_map(Account::domain) {
            if !domains.iter().any(|d| d == domain) {
                domains.push(domain.to_string());
            }
        }
        for domain in domains {
            if self.ensure_resolver(&domain).await {
                report.resolved_domains.push(domain);
            } else {
                report.unresolved_domains.push(domain);
            }
        }

        let mut roster = Vec::with_capacity(accounts.len());
        for account in accounts {
            let missing = account.missing_fields();
            if !missing.is_empty() {
                warn!(account = %account.id(), "Skipping account missing {}", missing.join(", "));
                report.invalid += 1;
                continue;
            }
            let proxy = account
                .domain()
                .and_then(|d| self.resolvers.get_mut(d))
                .and_then(|r| r.next_target())
                .map(Endpoint::sip_uri);
            if let Some(assigned) = AssignedAccount::new(account, proxy, &self.config.default_user_agent) {
                roster.push(assigned);
            }
        }

        for assigned in roster.iter().filter(|a| a.proxy.is_some()) {
            match self.persist(assigned).await {
                Ok(()) => report.persisted += 1,
                Err(e) => error!(account = %assigned.id, "Failed to persist account: {}", e),
            }
        }

        let mut pending = Vec::new();
        for assigned in roster.iter().filter(|a| a.proxy.is_some()) {
            let (token, snapshot) = self.sessions.insert(assigned.clone());
            let session = RegistrationSession::new(
                assigned.clone(),
                self.signaling.clone(),
                self.config.clone(),
                snapshot,
            );
            pending.push((session, token));
        }
        report.dispatched = pending.len();

        let dispatcher = tokio::spawn(
            dispatch(
                pending,
                batch,
                self.config.max_per_cycle,
                self.config.delay_between_cycle,
            )
            .instrument(Span::current()),
        );
        self.sessions.set_dispatcher(dispatcher);
        self.roster = roster;

        info!(
            invalid = report.invalid,
            unresolved = report.unresolved_domains.len(),
            "Assignment applied: {} accounts, {} persisted, {} dispatched",
            report.received,
            report.persisted,
            report.dispatched
        );
        report
    }

    /// Make sure `domain` has a cached resolver; failures are not cached
    async fn ensure_resolver(&mut self, domain: &str) -> bool {
        if self.resolvers.contains_key(domain) {
            return true;
        }
        match EndpointResolver::resolve(domain, self.dns.as_ref()).await {
            Ok(resolver) => {
                self.resolvers.insert(domain.to_string(), resolver);
                true
            }
            Err(e) => {
                error!("Skipping accounts of {}: {}", domain, e);
                false
            }
        }
    }

    async fn persist(&self, assigned: &AssignedAccount) -> BotResult<()> {
        let key = format!("{}{}", self.config.key_namespace, assigned.id);
        let record = serde_json::to_vec(&assigned.to_record()?)?;
        self.store.put(&key, Bytes::from(record)).await?;
        Ok(())
    }

    /// Run until `shutdown` fires or the subscription closes.
    ///
    /// Consumes the controller, so the bot channel is subscribed exactly once.
    pub async fn run(mut self, shutdown: CancellationToken) -> BotResult<()> {
        let span = info_span!("bot", bot = %self.identity);
        async move {
            let mut subscription = self.bus.subscribe(self.identity.channel()).await?;
            info!("Listening for assignments on {}", self.identity);

            let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let result = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break Ok(()),
                    _ = heartbeat.tick() => {
                        if let Err(e) = self.announce().await {
                            warn!("Failed to send heartbeat: {}", e);
                        }
                    }
                    message = subscription.recv() => match message {
                        Some(message) => {
                            self.handle_message(&message.payload).await;
                        }
                        None => {
                            break Err(BotError::Infra(infra_common::Error::transport(
                                "assignment subscription closed",
                            )));
                        }
                    },
                }
            };

            for (id, snapshot) in self.sessions.snapshots() {
                info!(
                    account = %id,
                    status = ?snapshot.status,
                    attempts = snapshot.attempts,
                    last_status = ?snapshot.last_status_code,
                    "Final registration state"
                );
            }
            self.sessions.cancel_all();
            info!("Bot stopped");
            result
        }
        .instrument(span)
        .await
    }
}

/// Start sessions in roster order, `per_cycle` at a time with `pause` between groups
async fn dispatch(
    sessions: Vec<(RegistrationSession, CancellationToken)>,
    batch: CancellationToken,
    per_cycle: usize,
    pause: Duration,
) {
    let per_cycle = per_cycle.max(1);
    for (index, (session, token)) in sessions.into_iter().enumerate() {
        if index > 0 && index % per_cycle == 0 {
            tokio::select! {
                _ = batch.cancelled() => return,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        if batch.is_cancelled() {
            return;
        }
        debug!(account = %session.account().id, "starting registration");
        tokio::spawn(session.run(token).instrument(Span::current()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_channel() {
        let identity = BotIdentity::generate();
        let suffix = identity.channel().strip_prefix("bot:").unwrap();
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(identity, BotIdentity::generate());
    }

    #[test]
    fn test_fixed_identity() {
        let identity = BotIdentity::new("bot:fixed");
        assert_eq!(identity.to_string(), "bot:fixed");
    }
}
