//! Reseller endpoint resolution and load balancing
//!
//! Each reseller domain is resolved once, on first sight, into an ordered list
//! of [`Endpoint`]s:
//!
//! 1. SRV `_sip._udp.<domain>`, sorted by priority then weight (lower first)
//! 2. otherwise the domain's addresses, each as `port 5060, priority 1, weight 1`
//!
//! Selection is strict round-robin over that sorted list. Priority and weight
//! only determine the rotation order, not selection probability.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::fmt;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::errors::{BotError, BotResult};

/// Port used for endpoints synthesized from address records
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// A resolved signaling endpoint of a reseller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address literal
    pub name: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

impl Endpoint {
    /// Endpoint built from an SRV record
    pub fn new(name: impl Into<String>, port: u16, priority: u16, weight: u16) -> Self {
        let name: String = name.into();
        Self {
            name: name.trim_end_matches('.').to_string(),
            port,
            priority,
            weight,
        }
    }

    /// Endpoint synthesized from an address record
    pub fn from_addr(addr: IpAddr) -> Self {
        Self::new(addr.to_string(), DEFAULT_SIP_PORT, 1, 1)
    }

    /// `sip:<host>:<port>`, used as the REGISTER proxy
    pub fn sip_uri(&self) -> String {
        match self.name.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("sip:[{}]:{}", v6, self.port),
            _ => format!("sip:{}:{}", self.name, self.port),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (p={} w={})", self.name, self.port, self.priority, self.weight)
    }
}

/// DNS queries needed to locate a reseller
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// SRV records for `name`, unordered
    async fn lookup_srv(&self, name: &str) -> BotResult<Vec<Endpoint>>;

    /// Addresses of `host`
    async fn lookup_addrs(&self, host: &str) -> BotResult<Vec<IpAddr>>;
}

/// [`DnsLookup`] backed by the system resolver configuration
pub struct HickoryDns {
    resolver: TokioAsyncResolver,
}

impl HickoryDns {
    /// Use `/etc/resolv.conf` (or platform equivalent), falling back to public defaults
    pub fn from_system_conf() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!("System resolver configuration unavailable ({}), using defaults", e);
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self { resolver }
    }
}

#[async_trait]
impl DnsLookup for HickoryDns {
    async fn lookup_srv(&self, name: &str) -> BotResult<Vec<Endpoint>> {
        let lookup = self
            .resolver
            .srv_lookup(name)
            .await
            .map_err(|e| BotError::resolution(name, e.to_string()))?;
        Ok(lookup
            .iter()
            .map(|srv| Endpoint::new(srv.target().to_utf8(), srv.port(), srv.priority(), srv.weight()))
            .collect())
    }

    async fn lookup_addrs(&self, host: &str) -> BotResult<Vec<IpAddr>> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| BotError::resolution(host, e.to_string()))?;
        Ok(lookup.iter().collect())
    }
}

/// Resolved endpoints of one reseller domain plus the rotation cursor
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    domain: String,
    targets: Vec<Endpoint>,
    cursor: usize,
}

impl EndpointResolver {
    /// Resolver over an already known endpoint set; sorts it
    pub fn with_targets(domain: impl Into<String>, mut targets: Vec<Endpoint>) -> Self {
        sort_targets(&mut targets);
        Self {
            domain: domain.into(),
            targets,
            cursor: 0,
        }
    }

    /// Resolve `domain`: SRV first, then address records
    pub async fn resolve(domain: &str, dns: &dyn DnsLookup) -> BotResult<Self> {
        let srv_name = format!("_sip._udp.{}", domain);
        let srv_error = match dns.lookup_srv(&srv_name).await {
            Ok(records) if !records.is_empty() => {
                let resolver = Self::with_targets(domain, records);
                info!("resolved {} via SRV: {}", domain, resolver.describe());
                return Ok(resolver);
            }
            Ok(_) => "no SRV records".to_string(),
            Err(e) => e.to_string(),
        };
        debug!("SRV lookup for {} failed ({}), trying address records", srv_name, srv_error);

        match dns.lookup_addrs(domain).await {
            Ok(addrs) if !addrs.is_empty() => {
                let targets = addrs.into_iter().map(Endpoint::from_addr).collect();
                let resolver = Self::with_targets(domain, targets);
                info!("resolved {} via address records: {}", domain, resolver.describe());
                Ok(resolver)
            }
            Ok(_) => Err(BotError::resolution(
                domain,
                format!("{}; no address records", srv_error),
            )),
            Err(e) => Err(BotError::resolution(domain, format!("{}; {}", srv_error, e))),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Endpoints in rotation order
    pub fn targets(&self) -> &[Endpoint] {
        &self.targets
    }

    /// Next endpoint in rotation; `None` when nothing was resolved
    pub fn next_target(&mut self) -> Option<&Endpoint> {
        if self.targets.is_empty() {
            return None;
        }
        let idx = self.cursor % self.targets.len();
        self.cursor = self.cursor.wrapping_add(1);
        self.targets.get(idx)
    }

    fn describe(&self) -> String {
        self.targets
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Stable sort by priority, then weight, both ascending
fn sort_targets(targets: &mut [Endpoint]) {
    targets.sort_by_key(|t| (t.priority, t.weight));
}
