//! Account resolution with just-in-time provisioning

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{AccountCache, Claims, IdentityError};
use crate::directory::{mail_query, Account, AccountDirectory, LOCAL_ACCOUNT};

/// Accounts requested per lookup; two is enough to detect ambiguity
pub const ACCOUNT_PAGE_SIZE: usize = 2;

/// Entry in the per-email provisioning lock map
///
/// Removes the map entry on drop once no other caller holds it, including
/// when the owning future is cancelled while waiting or creating.
struct ProvisioningSlot<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> ProvisioningSlot<'a> {
    fn acquire(locks: &'a DashMap<String, Arc<Mutex<()>>>, key: &'a str) -> Self {
        let lock = locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { locks, key, lock }
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for ProvisioningSlot<'_> {
    fn drop(&mut self) {
        // Two references left: the map's and ours. New callers clone through
        // the shard lock that `remove_if` holds, so none can slip in.
        self.locks.remove_if(self.key, |_, l| {
            Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2
        });
    }
}

/// Resolves claims to a directory account
///
/// The only writer of the account cache. Concurrent first logins for one
/// email are serialised by a per-email lock so only one account is created.
pub struct IdentityResolver {
    directory: Arc<dyn AccountDirectory>,
    cache: AccountCache,
    provisioning: DashMap<String, Arc<Mutex<()>>>,
}

impl IdentityResolver {
    /// Create a resolver over `directory` with its own cache
    pub fn new(directory: Arc<dyn AccountDirectory>, cache: AccountCache) -> Self {
        Self {
            directory,
            cache,
            provisioning: DashMap::new(),
        }
    }

    /// The account cache
    pub fn cache(&self) -> &AccountCache {
        &self.cache
    }

    /// Find the account for `email` in the cache or the directory
    pub async fn lookup(&self, email: &str) -> Result<Account, IdentityError> {
        if let Some(account) = self.cache.get(email) {
            debug!(email = %email, "Account cache hit");
            return Ok(account);
        }

        debug!(email = %email, "No cache entry, querying directory");
        let mut accounts = self
            .directory
            .list_accounts(&mail_query(email), ACCOUNT_PAGE_SIZE)
            .await
            .map_err(|e| IdentityError::DirectoryUnavailable {
                email: email.to_string(),
                message: e.to_string(),
            })?;

        match accounts.len() {
            0 => Err(IdentityError::AccountNotFound {
                email: email.to_string(),
            }),
            1 => {
                let account = accounts.remove(0);
                self.cache.insert(email, account.clone());
                Ok(account)
            }
            _ => Err(IdentityError::AmbiguousAccount {
                email: email.to_string(),
            }),
        }
    }

    /// Create an account from `claims` unless one appeared meanwhile
    pub async fn provision(&self, claims: &Claims) -> Result<Account, IdentityError> {
        let email = claims.email.as_str();
        let slot = ProvisioningSlot::acquire(&self.provisioning, email);
        let _guard = slot.lock().await;

        // A concurrent holder may have created the account while we waited,
        // so the directory is asked again under the lock
        match self.lookup(email).await {
            Err(IdentityError::AccountNotFound { .. }) => self.create(claims).await,
            other => other,
        }
    }

    /// Resolve `claims` to an enabled account, provisioning if needed
    ///
    /// Claims without an email are rejected before any lookup.
    pub async fn resolve(&self, claims: &Claims) -> Result<Account, IdentityError> {
        if claims.email.trim().is_empty() {
            return Err(IdentityError::MissingEmail {
                preferred_username: claims.preferred_username.clone(),
            });
        }

        let account = match self.lookup(&claims.email).await {
            Err(IdentityError::AccountNotFound { .. }) => self.provision(claims).await?,
            other => other?,
        };

        if !account.account_enabled {
            return Err(IdentityError::AccountDisabled {
                account_id: account.id,
            });
        }

        Ok(account)
    }

    async fn create(&self, claims: &Claims) -> Result<Account, IdentityError> {
        let request = Account {
            display_name: claims.display_name.clone(),
            preferred_name: claims.preferred_username.clone(),
            on_premises_sam_account_name: claims.preferred_username.clone(),
            mail: claims.email.clone(),
            account_enabled: true,
            creation_type: LOCAL_ACCOUNT.to_string(),
            ..Default::default()
        };

        let account = self.directory.create_account(request).await.map_err(|e| {
            warn!(email = %claims.email, error = %e, "Could not create account");
            IdentityError::ProvisioningFailed {
                email: claims.email.clone(),
                message: e.to_string(),
            }
        })?;

        info!(email = %claims.email, account_id = %account.id, "Provisioned account");
        self.cache.insert(&claims.email, account.clone());
        Ok(account)
    }
}
