//! Application-root wiring of the session lifecycle.
//!
//! `SessionService` owns one instance of every session component, all sharing
//! the same `SessionState`, refresh slot and termination path.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::{TokenApi, TokenEndpoint};
use crate::auth::{
    AuthInterceptor, AutoRefreshScheduler, Clock, ExpiryEvaluator, Navigator, RefreshOrchestrator,
    RefreshTaskHandle, SessionGuard, SystemClock, TerminationHandler,
};
use crate::config::SessionConfig;
use crate::session::{CredentialPair, SessionState, StagedSlots};
use crate::storage::{FileStore, KeyValueStore};

/// External collaborators the session runs against.
pub struct SessionBackends {
    /// Long-lived store for the credential pair and identity-scoped data
    pub durable: Arc<dyn KeyValueStore>,
    /// One-shot store for messages and return paths
    pub staged: Arc<dyn KeyValueStore>,
    pub endpoint: Arc<dyn TokenEndpoint>,
    pub navigator: Arc<dyn Navigator>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct SessionService {
    state: SessionState,
    staged: StagedSlots,
    expiry: ExpiryEvaluator,
    refresher: RefreshOrchestrator,
    guard: SessionGuard,
    interceptor: AuthInterceptor,
    scheduler: AutoRefreshScheduler,
    termination: TerminationHandler,
}

impl SessionService {
    pub fn new(config: &SessionConfig, backends: SessionBackends) -> Result<Self> {
        config.validate().context("Invalid session config")?;
        let state = SessionState::new(backends.durable);
        let staged = StagedSlots::new(backends.staged);
        let expiry = ExpiryEvaluator::new(backends.clock, config.expiry_buffer()?);
        let refresher = RefreshOrchestrator::new(
            state.clone(),
            Arc::clone(&backends.endpoint),
            config.request_timeout(),
        );
        let termination = TerminationHandler::new(
            state.clone(),
            staged.clone(),
            backends.navigator,
            config.login_path.clone(),
        );
        let guard = SessionGuard::new(
            state.clone(),
            expiry.clone(),
            refresher.clone(),
            termination.clone(),
            backends.endpoint,
            config.request_timeout(),
        );
        let interceptor =
            AuthInterceptor::new(state.clone(), refresher.clone(), termination.clone());
        let scheduler = AutoRefreshScheduler::new(
            state.clone(),
            expiry.clone(),
            refresher.clone(),
            config.refresh_interval(),
            config.refresh_threshold(),
        );

        Ok(Self {
            state,
            staged,
            expiry,
            refresher,
            guard,
            interceptor,
            scheduler,
            termination,
        })
    }

    /// File-backed stores under the configured storage dir, the HTTP token
    /// endpoint and the system clock.
    pub fn open(config: &SessionConfig, navigator: Arc<dyn Navigator>) -> Result<Self> {
        let durable = FileStore::open(config.session_store_path()?)
            .context("Failed to open session store")?;
        let staged = FileStore::open(config.staged_store_path()?)
            .context("Failed to open staged store")?;
        let endpoint = TokenApi::new(config.api_base.clone(), config.request_timeout())
            .context("Failed to build token API client")?;

        Self::new(
            config,
            SessionBackends {
                durable: Arc::new(durable),
                staged: Arc::new(staged),
                endpoint: Arc::new(endpoint),
                navigator,
                clock: Arc::new(SystemClock),
            },
        )
    }

    /// Load the persisted session. Returns true if one exists.
    pub fn init(&self) -> Result<bool> {
        let present = self.state.init().context("Failed to load session")?;
        info!(present, "Session service initialised");
        Ok(present)
    }

    /// Take over the pair produced by a successful login.
    pub fn login(&self, credentials: CredentialPair) -> Result<()> {
        self.state
            .establish(credentials)
            .context("Failed to store credentials")
    }

    /// Cache the signed-in user's account record.
    pub fn cache_user(&self, user: &serde_json::Value) -> Result<()> {
        self.state
            .store()
            .set(crate::storage::keys::USER, &user.to_string())
            .context("Failed to cache user")
    }

    /// User-initiated logout.
    pub fn logout(&self) {
        self.termination.terminate(None);
    }

    /// Start proactive refresh. The application root must keep the handle
    /// and stop it on teardown.
    pub fn start_auto_refresh(&self) -> RefreshTaskHandle {
        self.scheduler.clone().start()
    }

    /// Message staged by the last forced logout, consumed on read.
    pub fn take_redirect_message(&self) -> Option<String> {
        self.staged.take_message().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read redirect message");
            None
        })
    }

    /// Destination staged before the last forced logout, consumed on read.
    pub fn take_return_path(&self) -> Option<String> {
        self.staged.take_return_path().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read return path");
            None
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.guard.is_authenticated()
    }

    pub async fn validate_and_refresh(&self) -> bool {
        self.guard.validate_and_refresh().await
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn expiry(&self) -> &ExpiryEvaluator {
        &self.expiry
    }

    pub fn refresher(&self) -> &RefreshOrchestrator {
        &self.refresher
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn interceptor(&self) -> &AuthInterceptor {
        &self.interceptor
    }

    pub fn termination(&self) -> &TerminationHandler {
        &self.termination
    }
}
