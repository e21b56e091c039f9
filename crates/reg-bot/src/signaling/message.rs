//! REGISTER request building and response reading on top of `rsip`
//!
//! Only what a registering UAC needs: the outgoing request, the status and
//! headers of a response, the top Via branch and Contact parameters.

use rsip::prelude::*;
use rsip::{headers, Header, Host, Param};
use std::collections::HashMap;

use super::{ContactEntry, RegisterRequest, SipResponse};
use crate::errors::{BotError, BotResult};

/// Magic cookie every RFC 3261 branch starts with
pub const BRANCH_MAGIC: &str = "z9hG4bK";

/// Per-transaction values that vary between sends of the same REGISTER
#[derive(Debug, Clone)]
pub struct TransactionParams<'a> {
    /// `host:port` placed in our Via
    pub via_sent_by: &'a str,
    pub branch: &'a str,
    pub call_id: &'a str,
    pub from_tag: &'a str,
    pub cseq: u32,
    /// `Authorization` or `Proxy-Authorization` answering a digest challenge
    pub authorization: Option<Header>,
}

/// Build a REGISTER request
pub fn build_register(request: &RegisterRequest, tx: TransactionParams<'_>) -> BotResult<rsip::Request> {
    let uri = parse_uri(&request.uri)?;

    let mut headers: Vec<Header> = vec![
        headers::Via::new(format!("SIP/2.0/UDP {};branch={};rport", tx.via_sent_by, tx.branch)).into(),
        headers::MaxForwards::new("70").into(),
        headers::From::new(format!("{};tag={}", request.from, tx.from_tag)).into(),
        headers::To::new(request.from.clone()).into(),
        headers::CallId::new(tx.call_id).into(),
        headers::CSeq::new(format!("{} REGISTER", tx.cseq)).into(),
        headers::Contact::new(request.contact.clone()).into(),
        headers::UserAgent::new(request.user_agent.clone()).into(),
    ];
    if let Some(authorization) = tx.authorization {
        headers.push(authorization);
    }
    headers.push(headers::ContentLength::new("0").into());

    Ok(rsip::Request {
        method: rsip::Method::Register,
        uri,
        version: rsip::Version::V2,
        headers: headers.into(),
        body: Vec::new(),
    })
}

/// Parse a SIP URI, reporting malformed ones as protocol errors
pub fn parse_uri(uri: &str) -> BotResult<rsip::Uri> {
    rsip::Uri::try_from(uri).map_err(|e| BotError::protocol(format!("Invalid SIP URI {}: {}", uri, e)))
}

/// Host and port of a SIP URI; port defaults to 5060
pub fn uri_host_port(uri: &rsip::Uri) -> (String, u16) {
    let host = host_text(&uri.host_with_port.host);
    let port = uri
        .host_with_port
        .port
        .as_ref()
        .and_then(|p| p.to_string().parse().ok())
        .unwrap_or(5060);
    (host, port)
}

fn host_text(host: &Host) -> String {
    match host {
        Host::Domain(domain) => domain.to_string(),
        Host::IpAddr(ip) => ip.to_string(),
    }
}

/// A response plus the transaction identifiers needed to route it
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub response: SipResponse,
    /// Branch of the top Via
    pub branch: Option<String>,
}

/// Parse a SIP response datagram; `None` for requests or garbage
pub fn parse_response(data: &[u8]) -> Option<ParsedResponse> {
    let text = std::str::from_utf8(data).ok()?;
    let rsip::SipMessage::Response(response) = rsip::SipMessage::try_from(text).ok()? else {
        return None;
    };

    let branch = response
        .headers
        .iter()
        .find_map(|header| match header {
            Header::Via(via) => Some(via),
            _ => None,
        })
        .and_then(|via| via.typed().ok())
        .and_then(|via| {
            via.params.into_iter().find_map(|param| match param {
                Param::Branch(branch) => Some(branch.to_string()),
                _ => None,
            })
        });

    let status = response.status_code.code();
    let status_text = response.status_code.to_string();
    let reason = status_text
        .strip_prefix(&status.to_string())
        .unwrap_or(&status_text)
        .trim()
        .to_string();

    let headers = response
        .headers
        .iter()
        .filter_map(|header| {
            let line = header.to_string();
            line.split_once(':')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        })
        .collect();

    Some(ParsedResponse {
        response: SipResponse {
            status,
            reason,
            headers,
        },
        branch,
    })
}

/// Split on `sep` outside of `<...>` and quoted strings
fn split_top_level(value: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '<' if !quoted => depth += 1,
            '>' if !quoted => depth -= 1,
            c if c == sep && !quoted && depth <= 0 => {
                parts.push(value[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    let tail = value[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Parse a Contact header value into its entries. `*` and unparseable
/// entries yield nothing.
pub fn parse_contacts(value: &str) -> Vec<ContactEntry> {
    split_top_level(value, ',')
        .into_iter()
        .filter(|entry| !entry.is_empty() && *entry != "*")
        .filter_map(|entry| headers::Contact::new(entry).typed().ok())
        .map(contact_entry)
        .collect()
}

fn contact_entry(contact: rsip::typed::Contact) -> ContactEntry {
    // Without angle brackets header parameters may land on the URI
    let params: HashMap<String, String> = contact
        .uri
        .params
        .iter()
        .chain(contact.params.iter())
        .map(|param| {
            let text = param.to_string();
            let text = text.trim_start_matches(';');
            match text.split_once('=') {
                Some((k, v)) => (k.trim().to_ascii_lowercase(), v.trim().trim_matches('"').to_string()),
                None => (text.trim().to_ascii_lowercase(), String::new()),
            }
        })
        .collect();

    ContactEntry {
        host: Some(host_text(&contact.uri.host_with_port.host)),
        uri: contact.uri.to_string(),
        params,
    }
}
