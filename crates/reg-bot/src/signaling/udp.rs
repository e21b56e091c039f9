//! REGISTER client transactions over a shared UDP socket
//!
//! One socket serves every session. A reader task routes each incoming
//! response to the transaction waiting on its top Via branch. Requests are
//! retransmitted on the RFC 3261 non-INVITE schedule (T1 doubling up to T2)
//! until a final response arrives or the transaction times out (64*T1).
//! A single 401/407 Digest challenge is answered automatically.

use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::digest::{self, ChallengeKind};
use super::message::{build_register, parse_response, parse_uri, uri_host_port, TransactionParams, BRANCH_MAGIC};
use super::{RegisterRequest, SignalingClient, SipResponse};
use crate::errors::{BotError, BotResult};

const MAX_DATAGRAM: usize = 65_535;

/// Socket and timer settings for [`UdpSignalingClient`]
#[derive(Debug, Clone)]
pub struct UdpSignalingConfig {
    /// Local address to bind
    pub bind_addr: SocketAddr,
    /// `host:port` advertised in Via; defaults to the bound address, which
    /// must then be a concrete one
    pub advertised_addr: Option<String>,
    /// RTT estimate (T1)
    pub t1: Duration,
    /// Retransmission cap (T2)
    pub t2: Duration,
    /// Give up waiting for a final response after this long (Timer F)
    pub transaction_timeout: Duration,
}

impl Default for UdpSignalingConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5060)),
            advertised_addr: None,
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            transaction_timeout: Duration::from_secs(32),
        }
    }
}

type PendingMap = DashMap<String, mpsc::UnboundedSender<SipResponse>>;

/// Removes a transaction's routing entry however the wait ends
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    branch: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.branch);
    }
}

/// [`SignalingClient`] speaking SIP over UDP
pub struct UdpSignalingClient {
    socket: Arc<UdpSocket>,
    sent_by: String,
    pending: Arc<PendingMap>,
    config: UdpSignalingConfig,
    reader: JoinHandle<()>,
}

impl UdpSignalingClient {
    /// Bind the socket and start routing responses
    pub async fn bind(config: UdpSignalingConfig) -> BotResult<Self> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        let local_addr = socket.local_addr()?;
        let sent_by = match &config.advertised_addr {
            Some(advertised) => advertised.clone(),
            None if local_addr.ip().is_unspecified() => {
                return Err(BotError::config(format!(
                    "SIP socket bound to wildcard {} needs an advertised address for Via",
                    local_addr
                )));
            }
            None => local_addr.to_string(),
        };
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());

        let reader = tokio::spawn(read_loop(socket.clone(), pending.clone()));
        debug!("SIP signaling bound on {} (advertised as {})", local_addr, sent_by);

        Ok(Self {
            socket,
            sent_by,
            pending,
            config,
            reader,
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> BotResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn destination(&self, request: &RegisterRequest) -> BotResult<SocketAddr> {
        let target = parse_uri(request.proxy.as_deref().unwrap_or(&request.uri))?;
        let (host, port) = uri_host_port(&target);
        let mut addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
        addrs
            .next()
            .ok_or_else(|| BotError::signaling(format!("No address for {}", host)))
    }

    async fn transact(&self, dest: SocketAddr, payload: &str, branch: &str) -> BotResult<SipResponse> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.pending.insert(branch.to_string(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            branch: branch.to_string(),
        };

        let exchange = self.exchange(&mut rx, dest, payload, branch);
        match tokio::time::timeout(self.config.transaction_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(BotError::Timeout {
                seconds: self.config.transaction_timeout.as_secs(),
            }),
        }
    }

    /// Send and retransmit until a final response is routed to `rx`
    async fn exchange(
        &self,
        rx: &mut mpsc::UnboundedReceiver<SipResponse>,
        dest: SocketAddr,
        payload: &str,
        branch: &str,
    ) -> BotResult<SipResponse> {
        let mut interval = self.config.t1;
        self.socket.send_to(payload.as_bytes(), dest).await?;
        loop {
            tokio::select! {
                received = rx.recv() => {
                    let response = received
                        .ok_or_else(|| BotError::signaling("Response router stopped"))?;
                    if response.status >= 200 {
                        return Ok(response);
                    }
                    trace!("provisional {} for branch {}", response.status, branch);
                    interval = self.config.t2;
                }
                _ = tokio::time::sleep(interval) => {
                    trace!("retransmitting branch {} to {}", branch, dest);
                    self.socket.send_to(payload.as_bytes(), dest).await?;
                    interval = (interval * 2).min(self.config.t2);
                }
            }
        }
    }
}

impl Drop for UdpSignalingClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(socket: Arc<UdpSocket>, pending: Arc<PendingMap>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("SIP socket receive failed: {}", e);
                continue;
            }
        };
        let Some(parsed) = parse_response(&buf[..len]) else {
            trace!("ignoring non-response datagram from {}", from);
            continue;
        };
        let Some(branch) = parsed.branch else {
            debug!("response from {} without Via branch", from);
            continue;
        };
        match pending.get(&branch) {
            Some(tx) => {
                let _ = tx.send(parsed.response);
            }
            None => trace!("stray response for branch {} from {}", branch, from),
        }
    }
}

fn new_branch() -> String {
    format!("{}{}", BRANCH_MAGIC, Uuid::new_v4().simple())
}

fn new_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}

#[async_trait]
impl SignalingClient for UdpSignalingClient {
    async fn request(&self, request: RegisterRequest) -> BotResult<SipResponse> {
        let dest = self.destination(&request).await?;
        let call_id = Uuid::new_v4().simple().to_string();
        let from_tag = new_tag();

        let branch = new_branch();
        let first = build_register(
            &request,
            TransactionParams {
                via_sent_by: &self.sent_by,
                branch: &branch,
                call_id: &call_id,
                from_tag: &from_tag,
                cseq: 1,
                authorization: None,
            },
        )?;
        debug!("REGISTER {} via {}", request.uri, dest);
        let response = self.transact(dest, &first.to_string(), &branch).await?;

        let Some(kind) = ChallengeKind::for_status(response.status) else {
            return Ok(response);
        };
        let Some(challenge) = digest::find_challenge(&response, kind) else {
            return Ok(response);
        };
        debug!("REGISTER {} answering {} challenge (realm {})", request.uri, response.status, challenge.realm);

        let cnonce = format!("{:016x}", rand::random::<u64>());
        let authorization = digest::answer(challenge, kind, &request.auth, &first, cnonce);
        let branch = new_branch();
        let second = build_register(
            &request,
            TransactionParams {
                via_sent_by: &self.sent_by,
                branch: &branch,
                call_id: &call_id,
                from_tag: &from_tag,
                cseq: 2,
                authorization: Some(authorization),
            },
        )?;
        self.transact(dest, &second.to_string(), &branch).await
    }
}
