//! # Registration bot
//!
//! A worker that keeps third-party SIP accounts registered with their
//! resellers. Many bots run side by side; an assignment authority hands each
//! one a roster of accounts over pub/sub, and the bot:
//!
//! 1. announces itself on the controller channel every 60 seconds,
//! 2. resolves each reseller domain (SRV, then address records) once,
//! 3. spreads accounts over the reseller's endpoints round-robin,
//! 4. records the chosen endpoint per account in a shared key-value store,
//! 5. keeps every account registered, refreshing before expiry and retrying
//!    failures every five minutes, until a new roster replaces it.
//!
//! ## Layout
//!
//! - [`controller`]: identity, heartbeat, assignment handling, paced dispatch
//! - [`resolver`]: endpoint discovery and round-robin selection
//! - [`session`]: the per-account REGISTER loop
//! - [`registry`]: cancellable sessions of the current roster
//! - [`signaling`]: the REGISTER seam and its UDP implementation
//! - [`account`], [`protocol`], [`config`], [`errors`]: data and plumbing
//!
//! Pub/sub and key-value backends come from `infra-common`.

pub mod account;
pub mod config;
pub mod controller;
pub mod errors;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod signaling;

pub use account::{Account, AccountId, AssignedAccount};
pub use config::{BotConfig, RegistrationTiming};
pub use controller::{AssignmentReport, BotController, BotIdentity};
pub use errors::{BotError, BotResult};
pub use protocol::{BotCommand, Heartbeat};
pub use registry::{SessionEntry, SessionRegistry};
pub use resolver::{DnsLookup, Endpoint, EndpointResolver, HickoryDns};
pub use session::{AttemptOutcome, RegistrationSession, RegistrationStatus, SessionSnapshot};
pub use signaling::{
    RegisterRequest, SignalingClient, SipResponse, UdpSignalingClient, UdpSignalingConfig,
};
