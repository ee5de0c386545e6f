//! Session/account state (§4.9): opaque access and session keys, account
//! capability sets, and the monthly quota a *functional* account must
//! still have headroom in.
//!
//! The controller does not hold any of this directly — the session
//! manager is a separate collaborator the request pipeline consults
//! alongside the controller. Session keys here are opaque hex-encoded
//! random tokens rather than JWTs: nothing in this workspace needs a
//! self-describing, independently-verifiable token, so there is no
//! `jsonwebtoken` dependency to carry.

use std::collections::HashMap;
use std::sync::RwLock;

use jiff::{SignedDuration, Timestamp};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};

const TRACING_TARGET: &str = "vaultkeep_server::session";

const ACCESS_KEY_BYTES: usize = 32;
const SESSION_KEY_BYTES: usize = 32;
const REGISTRATION_KEY_BYTES: usize = 32;

/// Default lifetime of a freshly-minted session key.
pub const DEFAULT_SESSION_LIFETIME: SignedDuration = SignedDuration::from_hours(24);

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Opaque bearer credential tied to one account on one service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessKey(String);

impl AccessKey {
    pub fn generate() -> Self {
        Self(random_hex(ACCESS_KEY_BYTES))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AccessKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Short-lived cookie value resolving to an account server-side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    fn generate() -> Self {
        Self(random_hex(SESSION_KEY_BYTES))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One-time credential exchanged for an [`AccessKey`] via `/access_key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationKey(String);

impl RegistrationKey {
    pub fn generate() -> Self {
        Self(random_hex(REGISTRATION_KEY_BYTES))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Capabilities an account can hold. Mirrors the permission vocabulary a
/// hydrus-style repository account needs: importing content, managing the
/// petition queue, and administering the service itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ImportFiles,
    ImportTags,
    ManagePetitions,
    ManageAccounts,
    GeneralAdmin,
    Unrestricted,
}

/// Monthly usage allowance for an account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quota {
    pub max_bytes: u64,
    pub max_requests: u64,
    pub used_bytes: u64,
    pub used_requests: u64,
}

impl Quota {
    pub fn unlimited() -> Self {
        Self { max_bytes: u64::MAX, max_requests: u64::MAX, used_bytes: 0, used_requests: 0 }
    }

    pub fn new(max_bytes: u64, max_requests: u64) -> Self {
        Self { max_bytes, max_requests, used_bytes: 0, used_requests: 0 }
    }

    #[inline]
    pub fn has_headroom(&self) -> bool {
        self.used_bytes < self.max_bytes && self.used_requests < self.max_requests
    }

    fn charge(&mut self, bytes: u64) {
        self.used_bytes = self.used_bytes.saturating_add(bytes);
        self.used_requests = self.used_requests.saturating_add(1);
    }
}

/// A repository account: its credential, permission set, and quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub access_key: AccessKey,
    pub permissions: Vec<Permission>,
    pub quota: Quota,
    pub expires_at: Option<Timestamp>,
    pub banned: bool,
}

impl Account {
    pub fn new(access_key: AccessKey, permissions: Vec<Permission>, quota: Quota) -> Self {
        Self { id: Uuid::new_v4(), access_key, permissions, quota, expires_at: None, banned: false }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&Permission::Unrestricted) || self.permissions.contains(&permission)
    }

    /// A *functional* account: exists, not expired, not banned, has
    /// remaining monthly quota (glossary definition).
    pub fn is_functional(&self) -> bool {
        if self.banned {
            return false;
        }
        if let Some(expires_at) = self.expires_at
            && Timestamp::now() > expires_at
        {
            return false;
        }
        self.quota.has_headroom()
    }
}

struct Session {
    account_id: Uuid,
    expires_at: Timestamp,
}

impl Session {
    fn is_expired(&self) -> bool {
        Timestamp::now() > self.expires_at
    }
}

/// In-process session/account collaborator the request pipeline consults
/// alongside the controller. Holds accounts keyed by access key and id,
/// and live sessions keyed by session key.
pub struct SessionManager {
    accounts_by_access_key: RwLock<HashMap<AccessKey, Uuid>>,
    accounts: RwLock<HashMap<Uuid, Account>>,
    sessions: RwLock<HashMap<SessionKey, Session>>,
    registration_keys: RwLock<HashMap<RegistrationKey, AccessKey>>,
    lifetime: SignedDuration,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_lifetime(DEFAULT_SESSION_LIFETIME)
    }

    pub fn with_lifetime(lifetime: SignedDuration) -> Self {
        Self {
            accounts_by_access_key: RwLock::new(HashMap::new()),
            accounts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            registration_keys: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    /// Mints a registration key that `/access_key` will later exchange
    /// for a fresh account with the given permissions and quota.
    pub fn mint_registration_key(&self, permissions: Vec<Permission>, quota: Quota) -> RegistrationKey {
        let registration_key = RegistrationKey::generate();
        let access_key = AccessKey::generate();
        let account = Account::new(access_key.clone(), permissions, quota);
        let account_id = account.id;

        self.accounts.write().expect("accounts lock poisoned").insert(account_id, account);
        self.accounts_by_access_key
            .write()
            .expect("access key index poisoned")
            .insert(access_key.clone(), account_id);
        self.registration_keys
            .write()
            .expect("registration key registry poisoned")
            .insert(registration_key.clone(), access_key);

        registration_key
    }

    /// `/access_key`: exchanges a registration key for its access key.
    /// Registration keys are single-use.
    pub fn redeem_registration_key(&self, registration_key: &RegistrationKey) -> Result<AccessKey> {
        let access_key = self
            .registration_keys
            .write()
            .expect("registration key registry poisoned")
            .remove(registration_key)
            .ok_or_else(|| ErrorKind::InsufficientCredentials.with_message("registration key not recognised"))?;

        tracing::info!(target: TRACING_TARGET, "registration key redeemed");
        Ok(access_key)
    }

    fn account_id_for(&self, access_key: &AccessKey) -> Option<Uuid> {
        self.accounts_by_access_key.read().expect("access key index poisoned").get(access_key).copied()
    }

    /// `/session_key`: verifies the `Hydrus-Key` access key and mints a
    /// session, returning the key and its expiry.
    pub fn create_session(&self, access_key: &AccessKey) -> Result<(SessionKey, Timestamp)> {
        let account_id = self
            .account_id_for(access_key)
            .ok_or_else(|| ErrorKind::MissingCredentials.with_message("access key not recognised"))?;

        let functional = self
            .accounts
            .read()
            .expect("accounts lock poisoned")
            .get(&account_id)
            .map(Account::is_functional)
            .unwrap_or(false);
        if !functional {
            return Err(ErrorKind::InsufficientCredentials.with_message("account is not functional"));
        }

        let session_key = SessionKey::generate();
        let now = Timestamp::now();
        let expires_at = now.checked_add(self.lifetime).unwrap_or(now);
        self.sessions
            .write()
            .expect("sessions lock poisoned")
            .insert(session_key.clone(), Session { account_id, expires_at });

        tracing::debug!(target: TRACING_TARGET, %account_id, "session created");
        Ok((session_key, expires_at))
    }

    /// Resolves a session cookie to its account, failing with
    /// [`ErrorKind::SessionInvalid`] if the session is unknown or expired
    /// (§4.9 stage 3).
    pub fn resolve(&self, session_key: &SessionKey) -> Result<Account> {
        let account_id = {
            let sessions = self.sessions.read().expect("sessions lock poisoned");
            let session = sessions
                .get(session_key)
                .ok_or_else(|| ErrorKind::SessionInvalid.with_message("session key not recognised"))?;
            if session.is_expired() {
                return Err(ErrorKind::SessionInvalid.with_message("session key has expired"));
            }
            session.account_id
        };

        self.accounts
            .read()
            .expect("accounts lock poisoned")
            .get(&account_id)
            .cloned()
            .ok_or_else(|| ErrorKind::SessionInvalid.with_message("account no longer exists"))
    }

    /// Drops a session outright, used by tests exercising the 419 path
    /// and by an eventual `/session_key` revocation endpoint.
    pub fn drop_session(&self, session_key: &SessionKey) {
        self.sessions.write().expect("sessions lock poisoned").remove(session_key);
    }

    /// Checks that `account` holds `permission`, mapping absence to
    /// [`ErrorKind::InsufficientCredentials`] (§4.9 stage 3).
    pub fn require_permission(&self, account: &Account, permission: Permission) -> Result<()> {
        if !account.is_functional() {
            return Err(ErrorKind::InsufficientCredentials.with_message("account is not functional"));
        }
        if !account.has_permission(permission) {
            return Err(ErrorKind::InsufficientCredentials.with_message("account lacks the required permission"));
        }
        Ok(())
    }

    /// Charges bytes served plus one request against the account's
    /// monthly quota (§4.9 stage 5, render).
    pub fn charge(&self, account_id: Uuid, bytes: u64) -> Result<()> {
        let mut accounts = self.accounts.write().expect("accounts lock poisoned");
        let account = accounts
            .get_mut(&account_id)
            .ok_or_else(|| Error::from(ErrorKind::Internal).with_message("account vanished mid-request"))?;
        account.quota.charge(bytes);
        Ok(())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_key_exchanges_for_access_key() {
        let manager = SessionManager::new();
        let registration_key = manager.mint_registration_key(vec![Permission::ImportFiles], Quota::unlimited());
        let access_key = manager.redeem_registration_key(&registration_key).unwrap();
        assert!(manager.account_id_for(&access_key).is_some());
        assert!(manager.redeem_registration_key(&registration_key).is_err());
    }

    #[test]
    fn session_lifecycle_matches_the_spec_scenario() {
        let manager = SessionManager::new();
        let registration_key = manager.mint_registration_key(vec![Permission::Unrestricted], Quota::unlimited());
        let access_key = manager.redeem_registration_key(&registration_key).unwrap();

        let (session_key, _expiry) = manager.create_session(&access_key).unwrap();
        let account = manager.resolve(&session_key).unwrap();
        assert!(account.is_functional());

        manager.drop_session(&session_key);
        assert_eq!(manager.resolve(&session_key).unwrap_err().kind(), ErrorKind::SessionInvalid);
    }

    #[test]
    fn unknown_access_key_is_missing_credentials() {
        let manager = SessionManager::new();
        let bogus = AccessKey::generate();
        let err = manager.create_session(&bogus).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredentials);
    }

    #[test]
    fn quota_exhaustion_marks_account_non_functional() {
        let mut account = Account::new(AccessKey::generate(), vec![Permission::Unrestricted], Quota::new(10, 10));
        account.quota.charge(10);
        assert!(!account.is_functional());
    }

    #[test]
    fn require_permission_rejects_missing_capability() {
        let manager = SessionManager::new();
        let account = Account::new(AccessKey::generate(), vec![Permission::ImportFiles], Quota::unlimited());
        assert!(manager.require_permission(&account, Permission::ManageAccounts).is_err());
        assert!(manager.require_permission(&account, Permission::ImportFiles).is_ok());
    }
}
