//! Per-account registration loop
//!
//! A [`RegistrationSession`] sends REGISTER for one account, reads the granted
//! expiry from the response, and sleeps until the next attempt:
//!
//! - 200 OK with a usable expiry: refresh at `expires - 15s`
//! - anything else (non-200, 200 without expiry, transport error): retry in 300s
//!
//! The loop never finishes on its own. It stops only when the controller
//! cancels its token because a newer assignment superseded it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::account::AssignedAccount;
use crate::config::{BotConfig, RegistrationTiming};
use crate::signaling::{Credentials, RegisterRequest, SignalingClient, SipResponse};

/// Where an account's registration stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegistrationStatus {
    /// No attempt has completed yet
    Pending,
    /// Last attempt got a 200 OK with a usable expiry
    Registered,
    /// Last attempt errored, timed out, or got an unusable response
    Failed,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "Pending"),
            RegistrationStatus::Registered => write!(f, "Registered"),
            RegistrationStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Observable state of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub status: RegistrationStatus,
    /// Completed REGISTER attempts
    pub attempts: u64,
    pub last_status_code: Option<u16>,
    /// Expiry granted by the last successful attempt, in seconds
    pub granted_expires: Option<u32>,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: RegistrationStatus::Pending,
            attempts: 0,
            last_status_code: None,
            granted_expires: None,
            last_error: None,
            last_attempt_at: None,
            next_attempt_at: None,
        }
    }
}

/// Snapshot shared between a running session and the registry
pub type SharedSnapshot = Arc<RwLock<SessionSnapshot>>;

/// Result of one REGISTER attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 200 OK granting `expires` seconds
    Registered { expires: u32 },
    /// Final response other than 200
    Rejected { status: u16, reason: String },
    /// 200 OK carrying no usable expiry anywhere
    MissingExpires,
    /// Request could not be sent or no response was correlated
    TransportFailed { reason: String },
}

impl AttemptOutcome {
    /// Delay before the next REGISTER
    pub fn next_delay(&self, timing: &RegistrationTiming) -> Duration {
        match self {
            AttemptOutcome::Registered { expires } => timing.refresh_after(*expires),
            _ => timing.retry_interval,
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        match self {
            AttemptOutcome::Registered { .. } => RegistrationStatus::Registered,
            _ => RegistrationStatus::Failed,
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            AttemptOutcome::Registered { .. } | AttemptOutcome::MissingExpires => Some(200),
            AttemptOutcome::Rejected { status, .. } => Some(*status),
            AttemptOutcome::TransportFailed { .. } => None,
        }
    }

    fn error(&self) -> Option<String> {
        match self {
            AttemptOutcome::Registered { .. } => None,
            AttemptOutcome::Rejected { status, reason } => Some(format!("{} {}", status, reason)),
            AttemptOutcome::MissingExpires => Some("200 OK to REGISTER with no expires".to_string()),
            AttemptOutcome::TransportFailed { reason } => Some(reason.clone()),
        }
    }
}

/// Classify a final response.
///
/// Contacts pointing at one of our own hosts are ignored so an echoed local
/// binding is never mistaken for the upstream's record.
pub fn interpret_response(response: &SipResponse, config: &BotConfig) -> AttemptOutcome {
    if response.status != 200 {
        return AttemptOutcome::Rejected {
            status: response.status,
            reason: response.reason.clone(),
        };
    }

    let from_contact = response
        .contacts()
        .iter()
        .filter(|c| !c.host().map(|h| config.is_local_contact_host(h)).unwrap_or(false))
        .find_map(|c| c.expires());

    match from_contact.or_else(|| response.expires()) {
        Some(expires) => AttemptOutcome::Registered { expires },
        None => AttemptOutcome::MissingExpires,
    }
}

/// Registration loop of one assigned account
pub struct RegistrationSession {
    account: AssignedAccount,
    signaling: Arc<dyn SignalingClient>,
    config: Arc<BotConfig>,
    snapshot: SharedSnapshot,
}

impl RegistrationSession {
    pub fn new(
        account: AssignedAccount,
        signaling: Arc<dyn SignalingClient>,
        config: Arc<BotConfig>,
        snapshot: SharedSnapshot,
    ) -> Self {
        Self {
            account,
            signaling,
            config,
            snapshot,
        }
    }

    pub fn account(&self) -> &AssignedAccount {
        &self.account
    }

    /// The REGISTER this session sends on every attempt
    pub fn build_request(&self) -> RegisterRequest {
        let aor = self.account.aor();
        RegisterRequest {
            uri: aor.clone(),
            proxy: self.account.proxy.clone(),
            from: format!("<{}>", aor),
            contact: format!(
                "<sip:{}@{}>;expires={}",
                self.account.username,
                self.config.contact_host,
                self.config.timing.expiry_hint.as_secs()
            ),
            user_agent: self.account.user_agent.clone(),
            auth: Credentials {
                username: self.account.auth_user().to_string(),
                password: self.account.password.clone(),
            },
        }
    }

    /// Send one REGISTER and classify the result; logs exactly once
    pub async fn attempt(&self) -> AttemptOutcome {
        debug!(proxy = ?self.account.proxy, "sending REGISTER for {}", self.account.aor());
        let outcome = match self.signaling.request(self.build_request()).await {
            Ok(response) => interpret_response(&response, &self.config),
            Err(e) => AttemptOutcome::TransportFailed {
                reason: e.to_string(),
            },
        };

        match &outcome {
            AttemptOutcome::Registered { expires } => {
                debug!("200 OK to REGISTER with expires {}", expires)
            }
            AttemptOutcome::Rejected { status, reason } => {
                info!(status = *status, "reseller failed register: {}", reason)
            }
            AttemptOutcome::MissingExpires => {
                info!(status = 200u16, "reseller 200 OK to register with no expires")
            }
            AttemptOutcome::TransportFailed { reason } => {
                error!("Error sending register upstream: {}", reason)
            }
        }
        outcome
    }

    fn record(&self, outcome: &AttemptOutcome, delay: Duration) {
        let now = Utc::now();
        let mut snapshot = self.snapshot.write();
        snapshot.status = outcome.status();
        snapshot.attempts += 1;
        snapshot.last_status_code = outcome.status_code();
        snapshot.last_error = outcome.error();
        if let AttemptOutcome::Registered { expires } = outcome {
            snapshot.granted_expires = Some(*expires);
        }
        snapshot.last_attempt_at = Some(now);
        snapshot.next_attempt_at = chrono::Duration::from_std(delay).ok().map(|d| now + d);
    }

    /// Register and re-register until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let span = info_span!("registration", account = %self.account.id);
        async move {
            loop {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = self.attempt() => outcome,
                };
                let delay = outcome.next_delay(&self.config.timing);
                self.record(&outcome, delay);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            debug!("registration loop cancelled");
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::errors::{BotError, BotResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedSignaling {
        replies: Mutex<VecDeque<BotResult<SipResponse>>>,
        requests: Mutex<Vec<RegisterRequest>>,
    }

    impl ScriptedSignaling {
        fn new(replies: Vec<BotResult<SipResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SignalingClient for ScriptedSignaling {
        async fn request(&self, request: RegisterRequest) -> BotResult<SipResponse> {
            self.requests.lock().push(request);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(SipResponse::new(200, "OK").with_header("Expires", "3600")))
        }
    }

    fn assigned() -> AssignedAccount {
        let account: Account = serde_json::from_value(json!({
            "msisdn": "15550001",
            "sip_username": "alice",
            "sip_password": "pw",
            "auth_username": "alice-auth",
            "sip_hostname": "reseller.example.com"
        }))
        .unwrap();
        AssignedAccount::new(account, Some("sip:sbc1.reseller.example.com:5060".into()), "IQMobile").unwrap()
    }

    fn session(signaling: Arc<ScriptedSignaling>) -> (RegistrationSession, SharedSnapshot) {
        let snapshot = SharedSnapshot::default();
        let session = RegistrationSession::new(
            assigned(),
            signaling,
            Arc::new(BotConfig::default()),
            snapshot.clone(),
        );
        (session, snapshot)
    }

    #[test]
    fn test_build_request() {
        let (session, _) = session(ScriptedSignaling::new(vec![]));
        assert_eq!(
            session.build_request(),
            RegisterRequest {
                uri: "sip:alice@reseller.example.com".into(),
                proxy: Some("sip:sbc1.reseller.example.com:5060".into()),
                from: "<sip:alice@reseller.example.com>".into(),
                contact: "<sip:alice@localhost>;expires=3600".into(),
                user_agent: "IQMobile".into(),
                auth: Credentials {
                    username: "alice-auth".into(),
                    password: "pw".into(),
                },
            }
        );
    }

    #[test]
    fn test_contact_expires_wins_over_header() {
        let config = BotConfig::default();
        let response = SipResponse::new(200, "OK")
            .with_header("Contact", "<sip:alice@203.0.113.4:5060>;expires=3600")
            .with_header("Expires", "120");
        let outcome = interpret_response(&response, &config);
        assert_eq!(outcome, AttemptOutcome::Registered { expires: 3600 });
        assert_eq!(outcome.next_delay(&config.timing), Duration::from_secs(3585));
    }

    #[test]
    fn test_local_contact_is_ignored() {
        let config = BotConfig::default();
        let response = SipResponse::new(200, "OK")
            .with_header("Contact", "<sip:alice@localhost>;expires=3600, <sip:alice@198.51.100.2>;expires=900");
        assert_eq!(interpret_response(&response, &config), AttemptOutcome::Registered { expires: 900 });

        let only_local = SipResponse::new(200, "OK")
            .with_header("Contact", "<sip:alice@127.0.0.1:5060>;expires=3600")
            .with_header("Expires", "600");
        assert_eq!(interpret_response(&only_local, &config), AttemptOutcome::Registered { expires: 600 });
    }

    #[test]
    fn test_configured_local_hosts() {
        let config = BotConfig::default().with_local_contact_hosts(vec!["10.1.1.1".into()]);
        let response = SipResponse::new(200, "OK")
            .with_header("Contact", "<sip:alice@10.1.1.1>;expires=3600, <sip:alice@198.51.100.9>;expires=50");
        assert_eq!(interpret_response(&response, &config), AttemptOutcome::Registered { expires: 50 });
    }

    #[test]
    fn test_own_contact_host_is_ignored() {
        let config = BotConfig::default()
            .with_contact_host("203.0.113.50")
            .with_local_contact_hosts(vec![]);
        let response = SipResponse::new(200, "OK")
            .with_header("Contact", "<sip:alice@203.0.113.50:5060>;expires=3600, <sip:alice@198.51.100.9>;expires=240");
        assert_eq!(interpret_response(&response, &config), AttemptOutcome::Registered { expires: 240 });
    }

    #[test]
    fn test_no_expires_anywhere_is_failure() {
        let config = BotConfig::default();
        let response = SipResponse::new(200, "OK").with_header("Contact", "<sip:alice@203.0.113.4>");
        let outcome = interpret_response(&response, &config);
        assert_eq!(outcome, AttemptOutcome::MissingExpires);
        assert_eq!(outcome.status(), RegistrationStatus::Failed);
        assert_eq!(outcome.next_delay(&config.timing), Duration::from_secs(300));
    }

    #[test]
    fn test_non_200_is_rejected() {
        let config = BotConfig::default();
        let response = SipResponse::new(403, "Forbidden").with_header("Expires", "3600");
        let outcome = interpret_response(&response, &config);
        assert_eq!(
            outcome,
            AttemptOutcome::Rejected {
                status: 403,
                reason: "Forbidden".into()
            }
        );
        assert_eq!(outcome.next_delay(&config.timing), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_transport_error_outcome() {
        let signaling = ScriptedSignaling::new(vec![Err(BotError::Timeout { seconds: 32 })]);
        let (session, _) = session(signaling);
        let outcome = session.attempt().await;
        assert!(matches!(outcome, AttemptOutcome::TransportFailed { .. }));
        assert_eq!(outcome.next_delay(&RegistrationTiming::default()), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_refreshes_and_retries_until_cancelled() {
        let signaling = ScriptedSignaling::new(vec![
            Ok(SipResponse::new(200, "OK").with_header("Contact", "<sip:alice@203.0.113.4>;expires=60")),
            Ok(SipResponse::new(503, "Service Unavailable")),
            Ok(SipResponse::new(200, "OK").with_header("Expires", "3600")),
        ]);
        let (session, snapshot) = session(signaling.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));

        // t=0 register (60s), t=45 refresh -> 503, t=345 retry -> 3600
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(signaling.requests.lock().len(), 1);
        assert_eq!(snapshot.read().status, RegistrationStatus::Registered);
        assert_eq!(snapshot.read().granted_expires, Some(60));

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(signaling.requests.lock().len(), 2);
        assert_eq!(snapshot.read().status, RegistrationStatus::Failed);
        assert_eq!(snapshot.read().last_status_code, Some(503));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(signaling.requests.lock().len(), 3);
        assert_eq!(snapshot.read().status, RegistrationStatus::Registered);
        assert_eq!(snapshot.read().attempts, 3);

        cancel.cancel();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(signaling.requests.lock().len(), 3);
    }
}
