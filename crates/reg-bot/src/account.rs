//! Account records received from the assignment authority
//!
//! An [`Account`] is kept exactly as received (unknown fields included) so
//! that the persisted record mirrors what the authority sent. Once an account
//! has its credentials checked it becomes an [`AssignedAccount`], which keeps
//! its place in the roster whether or not a proxy could be chosen for it.
//! Registration sessions work from assigned accounts that have a proxy.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier used to key sessions and persisted records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        AccountId(s.to_string())
    }
}

/// A third-party SIP account as received in an assignment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Account {
    #[serde(default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub msisdn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sip_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sip_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_username: Option<String>,
    /// Reseller domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sip_hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sip_user_agent: Option<String>,
    /// Fields we do not interpret, carried through to persistence
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

impl Account {
    /// Registry key: the msisdn, or `user@domain` when the authority sent none
    pub fn id(&self) -> AccountId {
        match non_empty(&self.msisdn) {
            Some(msisdn) => AccountId(msisdn.to_string()),
            None => AccountId(format!(
                "{}@{}",
                self.username().unwrap_or("unknown"),
                self.domain().unwrap_or("unknown")
            )),
        }
    }

    pub fn username(&self) -> Option<&str> {
        non_empty(&self.sip_username)
    }

    pub fn password(&self) -> Option<&str> {
        non_empty(&self.sip_password)
    }

    /// Reseller domain
    pub fn domain(&self) -> Option<&str> {
        non_empty(&self.sip_hostname)
    }

    /// Names of required credential fields that are missing or empty.
    ///
    /// The domain is not among them: an account without one stays in the
    /// roster, it just never gets a proxy.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.username().is_none() {
            missing.push("sip_username");
        }
        if self.password().is_none() {
            missing.push("sip_password");
        }
        missing
    }
}

/// A validated account together with the routing decided for it
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedAccount {
    pub id: AccountId,
    pub username: String,
    pub password: String,
    pub auth_username: Option<String>,
    /// Reseller domain, absent when the authority sent none
    pub domain: Option<String>,
    /// Effective User-Agent (account override or configured default)
    pub user_agent: String,
    /// Chosen upstream endpoint as a SIP URI; `None` when there is no domain
    /// or it did not resolve
    pub proxy: Option<String>,
    /// The record as received
    pub account: Account,
}

impl AssignedAccount {
    /// Build from an account with credentials; `None` if one is missing
    pub fn new(account: Account, proxy: Option<String>, default_user_agent: &str) -> Option<Self> {
        let username = account.username()?.to_string();
        let password = account.password()?.to_string();
        let domain = account.domain().map(str::to_string);
        let user_agent = non_empty(&account.sip_user_agent)
            .unwrap_or(default_user_agent)
            .to_string();
        Some(Self {
            id: account.id(),
            username,
            password,
            auth_username: non_empty(&account.auth_username).map(str::to_string),
            domain,
            user_agent,
            proxy,
            account,
        })
    }

    /// Address of record, `sip:<user>@<domain>` (`sip:<user>` without a domain)
    pub fn aor(&self) -> String {
        match &self.domain {
            Some(domain) => format!("sip:{}@{}", self.username, domain),
            None => format!("sip:{}", self.username),
        }
    }

    /// Username presented in digest authentication
    pub fn auth_user(&self) -> &str {
        self.auth_username.as_deref().unwrap_or(&self.username)
    }

    /// JSON written to the shared key-value store: the received record plus `proxy`
    pub fn to_record(&self) -> serde_json::Result<Value> {
        let mut record = serde_json::to_value(&self.account)?;
        if let Value::Object(map) = &mut record {
            map.insert(
                "proxy".to_string(),
                self.proxy.clone().map(Value::String).unwrap_or(Value::Null),
            );
        }
        Ok(record)
    }
}
