//! SIP signaling seam
//!
//! Registration sessions only need one operation from a SIP stack: send a
//! REGISTER and hand back the final response. [`SignalingClient`] is that
//! seam; [`UdpSignalingClient`] is the production implementation.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::errors::BotResult;

pub mod digest;
pub mod message;
pub mod udp;

pub use udp::{UdpSignalingClient, UdpSignalingConfig};

/// Digest credentials for a REGISTER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Everything needed to send one REGISTER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Request-URI, `sip:<user>@<domain>`
    pub uri: String,
    /// Outbound proxy the request is sent to instead of the Request-URI host
    pub proxy: Option<String>,
    /// From header value
    pub from: String,
    /// Contact header value, including its `expires` hint
    pub contact: String,
    pub user_agent: String,
    pub auth: Credentials,
}

/// One parsed Contact entry: `<uri>;param=value`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContactEntry {
    pub uri: String,
    pub host: Option<String>,
    /// Parameter names are lower-cased; valueless parameters map to ""
    pub params: HashMap<String, String>,
}

impl ContactEntry {
    /// Host part of the contact URI
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// `expires` parameter, if present and a positive integer
    pub fn expires(&self) -> Option<u32> {
        self.params
            .get("expires")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| *v > 0)
    }
}

/// Final response to a REGISTER
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SipResponse {
    pub status: u16,
    pub reason: String,
    /// Headers in arrival order, names in their full form
    pub headers: Vec<(String, String)>,
}

impl SipResponse {
    /// Response with a status and no headers
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
        }
    }

    /// Append a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether a header is present (case-insensitive)
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// First value of a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header, in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every Contact entry across all Contact headers
    pub fn contacts(&self) -> Vec<ContactEntry> {
        self.get_all("Contact")
            .flat_map(message::parse_contacts)
            .collect()
    }

    /// `Expires` header, if present and a positive integer
    pub fn expires(&self) -> Option<u32> {
        self.get("Expires")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| *v > 0)
    }
}

/// Sends REGISTER requests and returns their final response
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Send `request`; resolves with the final (non-1xx) response
    async fn request(&self, request: RegisterRequest) -> BotResult<SipResponse>;
}
