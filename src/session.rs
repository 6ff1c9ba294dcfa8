//! Per-node session bookkeeping.
//!
//! Two tables live here: the login node's [`SessionDirectory`] of
//! authenticated account sessions, and the realm node's [`PendingLogins`]
//! table of in-flight player-login requests. Both are keyed by the account
//! name (upper-cased), which is also the correlation key for every
//! asynchronous reply in the hand-off protocol.
//!
//! Neither table is ever persisted; entries live only as long as the owning
//! node process.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Ceiling on live account sessions per login node.
pub const MAX_SESSIONS: usize = 1024;

/// Ceiling on in-flight player-login requests per realm node.
pub const MAX_PENDING_LOGINS: usize = 256;

/// Identifies one realm process in the cluster.
pub type RealmId = u8;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("login request already pending for account {0}")]
    DuplicateRequest(String),

    #[error("maximum pending login requests exceeded (limit: {MAX_PENDING_LOGINS})")]
    MaxPendingExceeded,

    #[error("no session for account {0}")]
    SessionNotFound(String),

    #[error("maximum sessions exceeded (limit: {MAX_SESSIONS})")]
    MaxSessionsExceeded,

    #[error("account {account} is already attached to realm {realm_id}")]
    AlreadyAttached { account: String, realm_id: RealmId },
}

/// One authenticated account on the login node.
///
/// Created by a successful account authentication, destroyed only by an
/// account-level logout. A realm claiming the session flips
/// `attached_realm_id` to `Some`; realm-side logout flips it back.
#[derive(Debug, Clone)]
pub struct AccountSession {
    pub account_id: u32,
    pub account_name: String,
    pub session_key: Vec<u8>,
    pub srp_verifier: Vec<u8>,
    pub srp_salt: Vec<u8>,
    pub start_time: DateTime<Utc>,
    pub attached_realm_id: Option<RealmId>,
    pub tutorial_flags: [u32; 8],
}

fn key_for(account_name: &str) -> String {
    account_name.to_uppercase()
}

/// Login-node table of live account sessions, keyed by account name.
#[derive(Default)]
pub struct SessionDirectory {
    sessions: HashMap<String, AccountSession>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session for `account_name`. A re-authentication replaces the
    /// previous session (the old session key is dead from that moment).
    pub fn create(&mut self, session: AccountSession) -> Result<(), SessionError> {
        let key = key_for(&session.account_name);
        if !self.sessions.contains_key(&key) && self.sessions.len() >= MAX_SESSIONS {
            return Err(SessionError::MaxSessionsExceeded);
        }
        self.sessions.insert(key, session);
        Ok(())
    }

    pub fn get(&self, account_name: &str) -> Option<&AccountSession> {
        self.sessions.get(&key_for(account_name))
    }

    pub fn get_mut(&mut self, account_name: &str) -> Option<&mut AccountSession> {
        self.sessions.get_mut(&key_for(account_name))
    }

    pub fn get_mut_by_id(&mut self, account_id: u32) -> Option<&mut AccountSession> {
        self.sessions
            .values_mut()
            .find(|s| s.account_id == account_id)
    }

    /// Realm claims the session. Fails if another realm already holds it
    /// (the `AlreadyLoggedIn` path) or no session exists.
    pub fn attach(&mut self, account_name: &str, realm_id: RealmId) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&key_for(account_name))
            .ok_or_else(|| SessionError::SessionNotFound(account_name.to_string()))?;
        if let Some(held) = session.attached_realm_id {
            if held != realm_id {
                return Err(SessionError::AlreadyAttached {
                    account: session.account_name.clone(),
                    realm_id: held,
                });
            }
        }
        session.attached_realm_id = Some(realm_id);
        Ok(())
    }

    /// Realm-side logout: the session survives, unattached.
    pub fn detach(&mut self, account_name: &str) {
        if let Some(session) = self.sessions.get_mut(&key_for(account_name)) {
            session.attached_realm_id = None;
        }
    }

    /// Release every attachment held by `realm_id` (realm link loss).
    /// Returns the affected account names.
    pub fn detach_realm(&mut self, realm_id: RealmId) -> Vec<String> {
        let mut affected = Vec::new();
        for session in self.sessions.values_mut() {
            if session.attached_realm_id == Some(realm_id) {
                session.attached_realm_id = None;
                affected.push(session.account_name.clone());
            }
        }
        affected
    }

    /// Account-level logout: the session is destroyed.
    pub fn remove(&mut self, account_name: &str) -> Option<AccountSession> {
        self.sessions.remove(&key_for(account_name))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// One in-flight player-login request on a realm node.
#[derive(Debug)]
pub struct PendingLoginRequest {
    pub account_name: String,
    pub submitted_at: Instant,
}

/// Realm-node table of in-flight player-login requests.
///
/// At most one entry per account name: a duplicate submission is rejected
/// synchronously rather than queued. `T` is whatever the caller needs back
/// when the reply arrives (the realm stores the waiting client's reply
/// channel there).
pub struct PendingLogins<T> {
    entries: HashMap<String, (PendingLoginRequest, T)>,
}

impl<T> Default for PendingLogins<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> PendingLogins<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, account_name: &str, data: T) -> Result<(), SessionError> {
        let key = key_for(account_name);
        if self.entries.contains_key(&key) {
            return Err(SessionError::DuplicateRequest(account_name.to_string()));
        }
        if self.entries.len() >= MAX_PENDING_LOGINS {
            return Err(SessionError::MaxPendingExceeded);
        }
        self.entries.insert(
            key,
            (
                PendingLoginRequest {
                    account_name: account_name.to_string(),
                    submitted_at: Instant::now(),
                },
                data,
            ),
        );
        Ok(())
    }

    /// Correlate a reply back to its request, removing the entry.
    pub fn resolve(&mut self, account_name: &str) -> Option<(PendingLoginRequest, T)> {
        self.entries.remove(&key_for(account_name))
    }

    pub fn contains(&self, account_name: &str) -> bool {
        self.entries.contains_key(&key_for(account_name))
    }

    /// Drop every entry (login link loss). Returns them so the realm can
    /// fail each waiting client visibly.
    pub fn drain(&mut self) -> Vec<(PendingLoginRequest, T)> {
        self.entries.drain().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(name: &str) -> AccountSession {
        AccountSession {
            account_id: 1,
            account_name: name.to_string(),
            session_key: vec![0xAB; 40],
            srp_verifier: vec![1; 20],
            srp_salt: vec![2; 32],
            start_time: Utc::now(),
            attached_realm_id: None,
            tutorial_flags: [0; 8],
        }
    }

    #[test]
    fn test_create_and_lookup_case_insensitive() {
        let mut dir = SessionDirectory::new();
        dir.create(session("Alice")).unwrap();
        assert!(dir.get("ALICE").is_some());
        assert!(dir.get("alice").is_some());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_reauth_replaces_session() {
        let mut dir = SessionDirectory::new();
        let mut first = session("alice");
        first.session_key = vec![1; 40];
        dir.create(first).unwrap();

        let mut second = session("alice");
        second.session_key = vec![2; 40];
        dir.create(second).unwrap();

        assert_eq!(dir.len(), 1);
        assert_eq!(dir.get("alice").unwrap().session_key, vec![2; 40]);
    }

    #[test]
    fn test_attach_detach_cycle() {
        let mut dir = SessionDirectory::new();
        dir.create(session("alice")).unwrap();

        dir.attach("alice", 3).unwrap();
        assert_eq!(dir.get("alice").unwrap().attached_realm_id, Some(3));

        // Same realm re-attaching is a no-op, a second realm is rejected.
        dir.attach("alice", 3).unwrap();
        assert!(matches!(
            dir.attach("alice", 4),
            Err(SessionError::AlreadyAttached { realm_id: 3, .. })
        ));

        dir.detach("alice");
        assert_eq!(dir.get("alice").unwrap().attached_realm_id, None);
        dir.attach("alice", 4).unwrap();
    }

    #[test]
    fn test_attach_unknown_account() {
        let mut dir = SessionDirectory::new();
        assert!(matches!(
            dir.attach("ghost", 1),
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_detach_realm_releases_only_its_accounts() {
        let mut dir = SessionDirectory::new();
        dir.create(session("alice")).unwrap();
        dir.create(session("bob")).unwrap();
        dir.create(session("carol")).unwrap();
        dir.attach("alice", 1).unwrap();
        dir.attach("bob", 2).unwrap();
        dir.attach("carol", 1).unwrap();

        let mut affected = dir.detach_realm(1);
        affected.sort();
        assert_eq!(affected, vec!["alice", "carol"]);
        assert_eq!(dir.get("alice").unwrap().attached_realm_id, None);
        assert_eq!(dir.get("bob").unwrap().attached_realm_id, Some(2));
    }

    #[test]
    fn test_remove_destroys_session() {
        let mut dir = SessionDirectory::new();
        dir.create(session("alice")).unwrap();
        assert!(dir.remove("alice").is_some());
        assert!(dir.get("alice").is_none());
        assert!(dir.remove("alice").is_none());
    }

    #[test]
    fn test_session_cap() {
        let mut dir = SessionDirectory::new();
        for i in 0..MAX_SESSIONS {
            dir.create(session(&format!("acct{}", i))).unwrap();
        }
        assert!(matches!(
            dir.create(session("overflow")),
            Err(SessionError::MaxSessionsExceeded)
        ));
        // Replacing an existing session is still allowed at the cap.
        dir.create(session("acct0")).unwrap();
    }

    #[test]
    fn test_duplicate_pending_rejected() {
        let mut pending: PendingLogins<u32> = PendingLogins::new();
        pending.submit("alice", 1).unwrap();

        let err = pending.submit("ALICE", 2).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateRequest(_)));
        // Exactly one entry survives, with the original payload.
        assert_eq!(pending.len(), 1);
        let (req, data) = pending.resolve("alice").unwrap();
        assert_eq!(req.account_name, "alice");
        assert_eq!(data, 1);
    }

    #[test]
    fn test_resolve_removes_entry() {
        let mut pending: PendingLogins<()> = PendingLogins::new();
        pending.submit("alice", ()).unwrap();
        assert!(pending.resolve("alice").is_some());
        assert!(pending.resolve("alice").is_none());
        // Resubmission after resolution is allowed again.
        pending.submit("alice", ()).unwrap();
    }

    #[test]
    fn test_drain_returns_everything() {
        let mut pending: PendingLogins<u8> = PendingLogins::new();
        pending.submit("a", 1).unwrap();
        pending.submit("b", 2).unwrap();
        let drained = pending.drain();
        assert_eq!(drained.len(), 2);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_pending_cap() {
        let mut pending: PendingLogins<()> = PendingLogins::new();
        for i in 0..MAX_PENDING_LOGINS {
            pending.submit(&format!("acct{}", i), ()).unwrap();
        }
        assert!(matches!(
            pending.submit("overflow", ()),
            Err(SessionError::MaxPendingExceeded)
        ));
    }
}
