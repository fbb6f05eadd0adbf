use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::storage::keys::{ACCESS_TOKEN, REFRESH_TOKEN, SESSION_KEYS};
use crate::storage::{KeyValueStore, StorageResult};

/// The access/refresh token pair of one authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Outcome of applying a refresh response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshApplied {
    /// New access token stored, refresh token unchanged
    AccessOnly,
    /// Both tokens replaced
    Rotated,
    /// The session ended or was replaced while the refresh was running
    Superseded,
}

/// Shared credential pair, mirrored in memory and in the durable store.
///
/// Every write holds the lock across the store write, so readers see either
/// the old pair or the new one, never a mix. Clone is cheap.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn KeyValueStore>,
    pair: RwLock<Option<CredentialPair>>,
}

impl SessionState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                pair: RwLock::new(None),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<CredentialPair>> {
        self.inner.pair.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<CredentialPair>> {
        self.inner.pair.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the persisted pair into memory. Returns true if a session exists.
    ///
    /// A half-persisted pair is discarded from the store.
    pub fn init(&self) -> StorageResult<bool> {
        let mut pair = self.write();
        let access = self.inner.store.get(ACCESS_TOKEN)?;
        let refresh = self.inner.store.get(REFRESH_TOKEN)?;

        match (access, refresh) {
            (Some(access), Some(refresh)) => {
                *pair = Some(CredentialPair { access, refresh });
                debug!("Session loaded from storage");
                Ok(true)
            }
            (None, None) => {
                *pair = None;
                debug!("No session in storage");
                Ok(false)
            }
            _ => {
                warn!("Discarding half-persisted credential pair");
                self.inner.store.remove_many(&[ACCESS_TOKEN, REFRESH_TOKEN])?;
                *pair = None;
                Ok(false)
            }
        }
    }

    pub fn credentials(&self) -> Option<CredentialPair> {
        self.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().as_ref().map(|p| p.access.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().as_ref().map(|p| p.refresh.clone())
    }

    pub fn is_present(&self) -> bool {
        self.read().is_some()
    }

    /// Store the pair handed over by a successful login.
    pub fn establish(&self, credentials: CredentialPair) -> StorageResult<()> {
        let mut pair = self.write();
        self.inner.store.set_many(&[
            (ACCESS_TOKEN, credentials.access.as_str()),
            (REFRESH_TOKEN, credentials.refresh.as_str()),
        ])?;
        *pair = Some(credentials);
        info!("Session established");
        Ok(())
    }

    /// Store the result of exchanging `used_refresh`.
    ///
    /// Nothing is written if the current refresh token is no longer
    /// `used_refresh` (logout or a new login happened in the meantime).
    pub fn apply_refresh(
        &self,
        used_refresh: &str,
        access: String,
        rotated_refresh: Option<String>,
    ) -> StorageResult<RefreshApplied> {
        let mut pair = self.write();
        let Some(current) = pair.as_ref() else {
            return Ok(RefreshApplied::Superseded);
        };
        if current.refresh != used_refresh {
            return Ok(RefreshApplied::Superseded);
        }

        let (next, applied) = match rotated_refresh {
            Some(refresh) => {
                self.inner
                    .store
                    .set_many(&[(ACCESS_TOKEN, access.as_str()), (REFRESH_TOKEN, refresh.as_str())])?;
                (CredentialPair { access, refresh }, RefreshApplied::Rotated)
            }
            None => {
                self.inner.store.set(ACCESS_TOKEN, &access)?;
                let refresh = current.refresh.clone();
                (CredentialPair { access, refresh }, RefreshApplied::AccessOnly)
            }
        };
        *pair = Some(next);
        Ok(applied)
    }

    /// Drop every session key from the store, then the pair from memory.
    ///
    /// If the store write fails the in-memory pair is kept.
    pub fn teardown(&self) -> StorageResult<()> {
        let mut pair = self.write();
        self.inner.store.remove_many(SESSION_KEYS)?;
        *pair = None;
        info!("Session torn down");
        Ok(())
    }

    /// The durable store behind this session.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.store
    }
}
