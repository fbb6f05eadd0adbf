//! Access token refresh with in-flight coalescing.
//!
//! Refresh tokens rotate on use, so two concurrent exchanges of the same
//! token end with the server rejecting the second one. Every caller that
//! arrives while an exchange is running joins it instead of starting another.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, TokenEndpoint};
use crate::session::{RefreshApplied, SessionState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token stored")]
    MissingRefreshToken,

    #[error("Refresh request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Refresh token rejected by server")]
    Rejected,

    #[error("Refresh request failed: {0}")]
    Request(String),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Session ended while the refresh was in flight")]
    Superseded,

    #[error("Failed to persist refreshed credentials: {0}")]
    Storage(String),
}

impl From<ApiError> for RefreshError {
    fn from(err: ApiError) -> Self {
        match err {
            e if e.is_auth_rejection() => RefreshError::Rejected,
            ApiError::InvalidResponse(msg) => RefreshError::InvalidResponse(msg),
            other => RefreshError::Request(other.to_string()),
        }
    }
}

type RefreshFlight = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

/// Exchanges the stored refresh token for a new access token.
/// Clone is cheap and clones share the in-flight slot.
#[derive(Clone)]
pub struct RefreshOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    state: SessionState,
    endpoint: Arc<dyn TokenEndpoint>,
    timeout: Duration,
    in_flight: Mutex<Option<RefreshFlight>>,
}

impl RefreshOrchestrator {
    pub fn new(state: SessionState, endpoint: Arc<dyn TokenEndpoint>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                endpoint,
                timeout,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Refresh the access token, joining an exchange already in flight.
    ///
    /// On success the new token is already persisted when this returns.
    /// Must be called inside a tokio runtime.
    pub async fn refresh_access_token(&self) -> Result<String, RefreshError> {
        let flight = {
            let mut slot = self.inner.slot();
            match slot.as_ref() {
                Some(flight) => {
                    debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    // Runs to completion and persists even if every caller is dropped
                    let inner = Arc::clone(&self.inner);
                    let task = tokio::spawn(async move {
                        let _clear = ClearOnExit(Arc::clone(&inner));
                        inner.exchange().await
                    });
                    let flight = task
                        .map(|joined| {
                            joined.unwrap_or_else(|e| {
                                warn!(error = %e, "Token refresh task failed");
                                Err(RefreshError::Request(e.to_string()))
                            })
                        })
                        .boxed()
                        .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Whether an exchange is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.slot().is_some()
    }
}

/// Empties the in-flight slot when the exchange task ends, panics included.
struct ClearOnExit(Arc<Inner>);

impl Drop for ClearOnExit {
    fn drop(&mut self) {
        self.0.slot().take();
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<RefreshFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn exchange(&self) -> Result<String, RefreshError> {
        let Some(refresh_token) = self.state.refresh_token() else {
            warn!("Token refresh requested without a refresh token");
            return Err(RefreshError::MissingRefreshToken);
        };

        info!("Refreshing access token");
        let result = tokio::time::timeout(self.timeout, self.endpoint.refresh(&refresh_token))
            .await
            .map_err(|_| RefreshError::Timeout(self.timeout))
            .and_then(|response| response.map_err(RefreshError::from));

        let tokens = match result {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                return Err(e);
            }
        };
        if tokens.access.is_empty() {
            warn!("Token refresh returned an empty access token");
            return Err(RefreshError::InvalidResponse(
                "empty access token".to_string(),
            ));
        }

        let access = tokens.access;
        let rotated = tokens.refresh.filter(|r| !r.is_empty());
        let applied = self
            .state
            .apply_refresh(&refresh_token, access.clone(), rotated)
            .map_err(|e| {
                warn!(error = %e, "Failed to persist refreshed credentials");
                RefreshError::Storage(e.to_string())
            })?;

        match applied {
            RefreshApplied::Superseded => {
                warn!("Discarding refresh result for an ended session");
                Err(RefreshError::Superseded)
            }
            RefreshApplied::Rotated => {
                info!("Access token refreshed, refresh token rotated");
                Ok(access)
            }
            RefreshApplied::AccessOnly => {
                info!("Access token refreshed");
                Ok(access)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RefreshedTokens;
    use crate::session::CredentialPair;
    use crate::storage::keys::{ACCESS_TOKEN, REFRESH_TOKEN};
    use crate::storage::{KeyValueStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Endpoint that answers after `release` is notified (when gated).
    struct FakeEndpoint {
        calls: AtomicUsize,
        response: Mutex<Option<Result<RefreshedTokens, ApiError>>>,
        gate: Option<Arc<Notify>>,
        seen: Mutex<Vec<String>>,
    }

    impl FakeEndpoint {
        fn answering(response: Result<RefreshedTokens, ApiError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: Mutex::new(Some(response)),
                gate: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn gated(response: Result<RefreshedTokens, ApiError>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::answering(response)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenEndpoint for FakeEndpoint {
        async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(refresh_token.to_string());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.response.lock().unwrap().as_ref() {
                Some(Ok(tokens)) => Ok(tokens.clone()),
                Some(Err(_)) | None => Err(ApiError::Unauthorized),
            }
        }

        async fn verify(&self, _token: &str) -> Result<bool, ApiError> {
            Ok(true)
        }
    }

    fn tokens(access: &str, refresh: Option<&str>) -> RefreshedTokens {
        RefreshedTokens {
            access: access.to_string(),
            refresh: refresh.map(str::to_string),
        }
    }

    fn setup(endpoint: Arc<FakeEndpoint>) -> (Arc<MemoryStore>, SessionState, RefreshOrchestrator) {
        let store = Arc::new(MemoryStore::new());
        let state = SessionState::new(store.clone());
        state.establish(CredentialPair::new("oldA", "oldR")).unwrap();
        let refresher = RefreshOrchestrator::new(state.clone(), endpoint, Duration::from_secs(30));
        (store, state, refresher)
    }

    #[tokio::test]
    async fn test_refresh_persists_rotation() {
        let endpoint = Arc::new(FakeEndpoint::answering(Ok(tokens("newA", Some("newR")))));
        let (store, state, refresher) = setup(endpoint.clone());

        assert_eq!(refresher.refresh_access_token().await.unwrap(), "newA");
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("newA"));
        assert_eq!(store.get(REFRESH_TOKEN).unwrap().as_deref(), Some("newR"));
        assert_eq!(state.refresh_token().as_deref(), Some("newR"));
        assert_eq!(endpoint.seen.lock().unwrap().as_slice(), ["oldR"]);
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_refresh_token() {
        let endpoint = Arc::new(FakeEndpoint::answering(Ok(tokens("newA", None))));
        let (store, _state, refresher) = setup(endpoint);

        refresher.refresh_access_token().await.unwrap();
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("newA"));
        assert_eq!(store.get(REFRESH_TOKEN).unwrap().as_deref(), Some("oldR"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_network() {
        let endpoint = Arc::new(FakeEndpoint::answering(Ok(tokens("newA", None))));
        let state = SessionState::new(Arc::new(MemoryStore::new()));
        let refresher = RefreshOrchestrator::new(state, endpoint.clone(), Duration::from_secs(30));

        assert_eq!(
            refresher.refresh_access_token().await,
            Err(RefreshError::MissingRefreshToken)
        );
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_leaves_storage_untouched() {
        let endpoint = Arc::new(FakeEndpoint::answering(Err(ApiError::Unauthorized)));
        let (store, _state, refresher) = setup(endpoint);

        assert_eq!(refresher.refresh_access_token().await, Err(RefreshError::Rejected));
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("oldA"));
        assert_eq!(store.get(REFRESH_TOKEN).unwrap().as_deref(), Some("oldR"));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_exchange() {
        let gate = Arc::new(Notify::new());
        let endpoint = Arc::new(FakeEndpoint::gated(
            Ok(tokens("newA", Some("newR"))),
            gate.clone(),
        ));
        let (_store, _state, refresher) = setup(endpoint.clone());

        let first = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh_access_token().await }
        });
        let second = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh_access_token().await }
        });

        // Let both callers reach the in-flight exchange before releasing it
        while endpoint.calls() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(refresher.is_refreshing());
        gate.notify_one();

        assert_eq!(first.await.unwrap().unwrap(), "newA");
        assert_eq!(second.await.unwrap().unwrap(), "newA");
        assert_eq!(endpoint.calls(), 1);
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn test_sequential_refreshes_use_rotated_token() {
        let endpoint = Arc::new(FakeEndpoint::answering(Ok(tokens("newA", Some("newR")))));
        let (_store, _state, refresher) = setup(endpoint.clone());

        refresher.refresh_access_token().await.unwrap();
        refresher.refresh_access_token().await.unwrap();
        assert_eq!(endpoint.calls(), 2);
        assert_eq!(endpoint.seen.lock().unwrap().as_slice(), ["oldR", "newR"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_exchange_times_out() {
        let gate = Arc::new(Notify::new());
        let endpoint = Arc::new(FakeEndpoint::gated(Ok(tokens("newA", None)), gate));
        let (store, _state, refresher) = setup(endpoint);

        assert_eq!(
            refresher.refresh_access_token().await,
            Err(RefreshError::Timeout(Duration::from_secs(30)))
        );
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("oldA"));
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_strand_exchange() {
        let gate = Arc::new(Notify::new());
        let endpoint = Arc::new(FakeEndpoint::gated(
            Ok(tokens("newA", Some("newR"))),
            gate.clone(),
        ));
        let (store, state, refresher) = setup(endpoint.clone());

        let caller = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh_access_token().await }
        });
        while endpoint.calls() == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        // A caller arriving after the cancellation joins the same exchange
        let late = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh_access_token().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        assert_eq!(late.await.unwrap().unwrap(), "newA");
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("newA"));
        assert_eq!(store.get(REFRESH_TOKEN).unwrap().as_deref(), Some("newR"));
        assert_eq!(state.credentials(), Some(CredentialPair::new("newA", "newR")));
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn test_exchange_completes_with_no_caller_left() {
        let gate = Arc::new(Notify::new());
        let endpoint = Arc::new(FakeEndpoint::gated(
            Ok(tokens("newA", Some("newR"))),
            gate.clone(),
        ));
        let (store, _state, refresher) = setup(endpoint.clone());

        let caller = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh_access_token().await }
        });
        while endpoint.calls() == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();
        let _ = caller.await;
        gate.notify_one();

        while refresher.is_refreshing() {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("newA"));
        assert_eq!(store.get(REFRESH_TOKEN).unwrap().as_deref(), Some("newR"));
    }

    #[tokio::test]
    async fn test_refresh_after_logout_is_superseded() {
        let gate = Arc::new(Notify::new());
        let endpoint = Arc::new(FakeEndpoint::gated(Ok(tokens("newA", None)), gate.clone()));
        let (store, state, refresher) = setup(endpoint.clone());

        let pending = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh_access_token().await }
        });
        while endpoint.calls() == 0 {
            tokio::task::yield_now().await;
        }
        state.teardown().unwrap();
        gate.notify_one();

        assert_eq!(pending.await.unwrap(), Err(RefreshError::Superseded));
        assert_eq!(store.get(ACCESS_TOKEN).unwrap(), None);
    }

    #[test]
    fn test_api_error_classification() {
        assert_eq!(RefreshError::from(ApiError::Unauthorized), RefreshError::Rejected);
        assert_eq!(
            RefreshError::from(ApiError::BadRequest("token_not_valid".into())),
            RefreshError::Rejected
        );
        assert!(matches!(
            RefreshError::from(ApiError::ServerError("boom".into())),
            RefreshError::Request(_)
        ));
        assert!(matches!(
            RefreshError::from(ApiError::InvalidResponse("bad".into())),
            RefreshError::InvalidResponse(_)
        ));
    }
}
