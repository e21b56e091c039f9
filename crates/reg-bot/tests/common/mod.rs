//! Shared test doubles for controller integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::Instant;

use infra_common::{MemoryBus, MemoryStore};
use rvoip_reg_bot::errors::{BotError, BotResult};
use rvoip_reg_bot::{
    Account, BotConfig, BotController, BotIdentity, DnsLookup, Endpoint, RegisterRequest,
    SignalingClient, SipResponse,
};

/// DNS with programmable answers that records every query
#[derive(Default)]
pub struct CountingDns {
    srv: Mutex<HashMap<String, Vec<Endpoint>>>,
    addrs: Mutex<HashMap<String, Vec<IpAddr>>>,
    queries: Mutex<Vec<String>>,
}

impl CountingDns {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_srv(&self, domain: &str, targets: Vec<Endpoint>) {
        self.srv.lock().insert(format!("_sip._udp.{}", domain), targets);
    }

    pub fn set_addrs(&self, host: &str, addrs: Vec<IpAddr>) {
        self.addrs.lock().insert(host.to_string(), addrs);
    }

    /// Number of queries (SRV or address) that mention `domain`
    pub fn queries_for(&self, domain: &str) -> usize {
        self.queries.lock().iter().filter(|q| q.ends_with(domain)).count()
    }
}

#[async_trait]
impl DnsLookup for CountingDns {
    async fn lookup_srv(&self, name: &str) -> BotResult<Vec<Endpoint>> {
        self.queries.lock().push(name.to_string());
        self.srv
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| BotError::resolution(name, "NXDOMAIN"))
    }

    async fn lookup_addrs(&self, host: &str) -> BotResult<Vec<IpAddr>> {
        self.queries.lock().push(host.to_string());
        self.addrs
            .lock()
            .get(host)
            .cloned()
            .ok_or_else(|| BotError::resolution(host, "NXDOMAIN"))
    }
}

/// A REGISTER seen by [`RecordingSignaling`]
#[derive(Debug, Clone)]
pub struct SentRegister {
    pub at: Instant,
    pub request: RegisterRequest,
}

impl SentRegister {
    /// Username part of the Request-URI
    pub fn user(&self) -> &str {
        self.request
            .uri
            .trim_start_matches("sip:")
            .split('@')
            .next()
            .unwrap_or_default()
    }
}

/// Signaling client answering from per-user scripts, 200 OK/3600 otherwise
#[derive(Default)]
pub struct RecordingSignaling {
    sent: Mutex<Vec<SentRegister>>,
    scripts: Mutex<HashMap<String, VecDeque<SipResponse>>>,
}

impl RecordingSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue responses for `user`; once drained the default answer applies
    pub fn script(&self, user: &str, responses: Vec<SipResponse>) {
        self.scripts
            .lock()
            .entry(user.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn sent(&self) -> Vec<SentRegister> {
        self.sent.lock().clone()
    }

    pub fn sent_for(&self, user: &str) -> Vec<SentRegister> {
        self.sent.lock().iter().filter(|s| s.user() == user).cloned().collect()
    }
}

pub fn ok_with_contact(expires: u32) -> SipResponse {
    SipResponse::new(200, "OK").with_header(
        "Contact",
        format!("<sip:bot@203.0.113.10:5060>;expires={}", expires),
    )
}

#[async_trait]
impl SignalingClient for RecordingSignaling {
    async fn request(&self, request: RegisterRequest) -> BotResult<SipResponse> {
        let sent = SentRegister {
            at: Instant::now(),
            request,
        };
        let user = sent.user().to_string();
        self.sent.lock().push(sent);
        let scripted = self.scripts.lock().get_mut(&user).and_then(|q| q.pop_front());
        Ok(scripted.unwrap_or_else(|| ok_with_contact(3600)))
    }
}

/// Account JSON for `user` at `domain`
pub fn account_json(msisdn: &str, user: &str, domain: &str) -> Value {
    json!({
        "msisdn": msisdn,
        "sip_username": user,
        "sip_password": "secret",
        "sip_hostname": domain,
    })
}

pub fn account(msisdn: &str, user: &str, domain: &str) -> Account {
    serde_json::from_value(account_json(msisdn, user, domain)).unwrap()
}

/// Controller plus handles on every collaborator
pub struct Harness {
    pub bus: Arc<MemoryBus>,
    pub store: Arc<MemoryStore>,
    pub dns: Arc<CountingDns>,
    pub signaling: Arc<RecordingSignaling>,
}

impl Harness {
    pub fn new() -> Self {
        let dns = CountingDns::new();
        dns.set_srv(
            "reseller.example.com",
            vec![
                Endpoint::new("sbc2.reseller.example.com.", 5060, 10, 5),
                Endpoint::new("sbc1.reseller.example.com.", 5060, 5, 1),
            ],
        );
        Self {
            bus: Arc::new(MemoryBus::new()),
            store: Arc::new(MemoryStore::new()),
            dns,
            signaling: RecordingSignaling::new(),
        }
    }

    pub fn controller(&self, config: BotConfig) -> BotController {
        BotController::new(
            BotIdentity::new("bot:test"),
            config,
            self.bus.clone(),
            self.store.clone(),
            self.dns.clone(),
            self.signaling.clone(),
        )
        .unwrap()
    }
}
