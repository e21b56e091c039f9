//! Registry of the sessions belonging to the current assignment
//!
//! Every session of a batch holds a child of the batch's cancellation token,
//! so replacing the roster is a single cancel. The paced dispatcher of the
//! batch is tracked here as well and aborted along with it.

use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::account::{AccountId, AssignedAccount};
use crate::session::{SessionSnapshot, SharedSnapshot};

/// One account's slot in the registry
#[derive(Debug)]
pub struct SessionEntry {
    pub account: AssignedAccount,
    pub snapshot: SharedSnapshot,
    token: CancellationToken,
}

impl SessionEntry {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }
}

/// Sessions of the active batch, keyed by account
#[derive(Debug)]
pub struct SessionRegistry {
    batch: CancellationToken,
    entries: HashMap<AccountId, SessionEntry>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            batch: CancellationToken::new(),
            entries: HashMap::new(),
            dispatcher: None,
        }
    }

    /// Cancel every session and the pending dispatcher, then start an empty batch.
    ///
    /// Returns the new batch token.
    pub fn begin_batch(&mut self) -> CancellationToken {
        self.cancel_all();
        self.batch = CancellationToken::new();
        self.batch.clone()
    }

    /// Add an account to the current batch.
    ///
    /// A duplicate id replaces the earlier entry, whose token is cancelled.
    pub fn insert(&mut self, account: AssignedAccount) -> (CancellationToken, SharedSnapshot) {
        let token = self.batch.child_token();
        let snapshot = SharedSnapshot::default();
        let entry = SessionEntry {
            account: account.clone(),
            snapshot: snapshot.clone(),
            token: token.clone(),
        };
        if let Some(previous) = self.entries.insert(account.id.clone(), entry) {
            debug!(account = %account.id, "duplicate account in batch, replacing");
            previous.token.cancel();
        }
        (token, snapshot)
    }

    /// Track the task starting this batch's sessions
    pub fn set_dispatcher(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.dispatcher.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the whole batch and forget its entries
    pub fn cancel_all(&mut self) {
        self.batch.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        if !self.entries.is_empty() {
            debug!("cancelled {} sessions", self.entries.len());
        }
        self.entries.clear();
    }

    pub fn get(&self, id: &AccountId) -> Option<&SessionEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose token has not been cancelled
    pub fn live_count(&self) -> usize {
        self.entries.values().filter(|e| !e.is_cancelled()).count()
    }

    /// Snapshots of every entry, ordered by account id
    pub fn snapshots(&self) -> Vec<(AccountId, SessionSnapshot)> {
        let mut snapshots: Vec<_> = self
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.batch.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::session::RegistrationStatus;
    use serde_json::json;

    fn assigned(msisdn: &str) -> AssignedAccount {
        let account: Account = serde_json::from_value(json!({
            "msisdn": msisdn,
            "sip_username": format!("u{}", msisdn),
            "sip_password": "pw",
            "sip_hostname": "reseller.example.com"
        }))
        .unwrap();
        AssignedAccount::new(account, Some("sip:10.0.0.1:5060".into()), "IQMobile").unwrap()
    }

    #[test]
    fn test_new_batch_cancels_previous_tokens() {
        let mut registry = SessionRegistry::new();
        registry.begin_batch();
        let (a, _) = registry.insert(assigned("1"));
        let (b, _) = registry.insert(assigned("2"));
        assert_eq!(registry.live_count(), 2);

        registry.begin_batch();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(registry.is_empty());

        let (c, _) = registry.insert(assigned("3"));
        assert!(!c.is_cancelled());
        assert_eq!(registry.live_count(), 1);
        assert!(registry.get(&AccountId::from("3")).is_some());
    }

    #[test]
    fn test_duplicate_id_keeps_one_entry() {
        let mut registry = SessionRegistry::new();
        registry.begin_batch();
        let (first, _) = registry.insert(assigned("7"));
        let (second, _) = registry.insert(assigned("7"));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshots_start_pending() {
        let mut registry = SessionRegistry::new();
        registry.begin_batch();
        registry.insert(assigned("2"));
        registry.insert(assigned("1"));
        let snapshots = registry.snapshots();
        assert_eq!(snapshots[0].0, AccountId::from("1"));
        assert!(snapshots.iter().all(|(_, s)| s.status == RegistrationStatus::Pending));
    }

    #[tokio::test]
    async fn test_cancel_all_aborts_dispatcher() {
        let mut registry = SessionRegistry::new();
        registry.begin_batch();
        let (alive, dropped) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await
        });
        registry.set_dispatcher(handle);
        registry.cancel_all();
        // the sender is dropped only when the task is torn down
        assert!(dropped.await.is_err());
    }
}
