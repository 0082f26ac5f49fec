//! Usage: In-memory OAuth account pool (exclusive leases + credential updates).
//!
//! The pool owns every account for the process lifetime. Callers only ever
//! hold an [`AccountLease`], which marks the account busy for exactly as long
//! as the lease lives; release happens in `Drop`, so the account comes back
//! on every exit path including panics and task cancellation.
//!
//! Accounts are identified by their upstream organization id.

use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::mask_token;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Registration input for one upstream OAuth identity.
#[derive(Debug, Clone)]
pub struct Account {
    pub organization_id: String,
    pub access_token: String,
    /// Secondary cookie-like credential usable to refresh the access token.
    pub cookie: Option<String>,
    /// Unix seconds at which a known rate-limit window ends.
    pub resets_at: Option<i64>,
    /// Subscription-tier eligibility tags, e.g. `"max"`.
    pub tiers: Vec<String>,
}

#[derive(Debug)]
struct CredentialState {
    access_token: String,
    cookie: Option<String>,
    resets_at: Option<i64>,
}

#[derive(Debug)]
pub struct AccountEntry {
    organization_id: String,
    tiers: Vec<String>,
    busy: AtomicBool,
    credentials: Mutex<CredentialState>,
}

impl AccountEntry {
    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn has_tier(&self, tier: &str) -> bool {
        self.tiers.iter().any(|t| t == tier)
    }

    pub fn access_token(&self) -> String {
        self.credentials.lock_or_recover().access_token.clone()
    }

    pub fn cookie(&self) -> Option<String> {
        self.credentials.lock_or_recover().cookie.clone()
    }

    pub fn has_cookie(&self) -> bool {
        self.credentials
            .lock_or_recover()
            .cookie
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }

    /// Install a refreshed access token, optionally rotating the cookie.
    pub fn install_credentials(&self, access_token: String, cookie: Option<String>) {
        let mut guard = self.credentials.lock_or_recover();
        tracing::info!(
            account = %self.organization_id,
            token = %mask_token(&access_token),
            "installing refreshed access token"
        );
        guard.access_token = access_token;
        if let Some(cookie) = cookie {
            guard.cookie = Some(cookie);
        }
    }

    pub fn resets_at(&self) -> Option<i64> {
        self.credentials.lock_or_recover().resets_at
    }

    pub fn set_resets_at(&self, resets_at: Option<i64>) {
        self.credentials.lock_or_recover().resets_at = resets_at;
    }

    fn rate_limited_at(&self, now_unix: i64) -> bool {
        self.credentials
            .lock_or_recover()
            .resets_at
            .is_some_and(|at| at > now_unix)
    }
}

/// Exclusive hold on one account for the duration of an upstream exchange.
#[derive(Debug)]
pub struct AccountLease {
    entry: Arc<AccountEntry>,
}

impl AccountLease {
    pub fn entry(&self) -> &AccountEntry {
        &self.entry
    }
}

impl std::ops::Deref for AccountLease {
    type Target = AccountEntry;

    fn deref(&self) -> &AccountEntry {
        &self.entry
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        self.entry.busy.store(false, Ordering::Release);
        tracing::debug!(account = %self.entry.organization_id, "account lease released");
    }
}

#[derive(Default)]
pub struct AccountPool {
    entries: Mutex<Vec<Arc<AccountEntry>>>,
}

impl AccountPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account: Account) {
        let entry = Arc::new(AccountEntry {
            organization_id: account.organization_id,
            tiers: account.tiers,
            busy: AtomicBool::new(false),
            credentials: Mutex::new(CredentialState {
                access_token: account.access_token,
                cookie: account.cookie,
                resets_at: account.resets_at,
            }),
        });
        self.entries.lock_or_recover().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock_or_recover().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim a specific account. `None` when it is unregistered, busy, or
    /// still inside a known rate-limit window.
    pub fn get_by_id(&self, organization_id: &str, now_unix: i64) -> Option<AccountLease> {
        let entry = self
            .entries
            .lock_or_recover()
            .iter()
            .find(|e| e.organization_id == organization_id)
            .cloned()?;
        Self::try_claim(entry, now_unix)
    }

    /// Claim the first available account, optionally constrained to a
    /// subscription tier. Scans in registration order.
    pub fn acquire(&self, tier: Option<&str>, now_unix: i64) -> Option<AccountLease> {
        let candidates: Vec<Arc<AccountEntry>> =
            self.entries.lock_or_recover().iter().cloned().collect();
        for entry in candidates {
            if let Some(tier) = tier {
                if !entry.has_tier(tier) {
                    continue;
                }
            }
            if let Some(lease) = Self::try_claim(entry, now_unix) {
                return Some(lease);
            }
        }
        None
    }

    fn try_claim(entry: Arc<AccountEntry>, now_unix: i64) -> Option<AccountLease> {
        if entry.rate_limited_at(now_unix) {
            return None;
        }
        if entry
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        Some(AccountLease { entry })
    }
}
