use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::expiry::ExpiryEvaluator;
use super::refresh::RefreshOrchestrator;
use super::termination::{TerminationHandler, SESSION_EXPIRED_MESSAGE};
use crate::api::TokenEndpoint;
use crate::session::SessionState;

/// Checks run before protected navigation.
///
/// `is_authenticated` is an offline storage check; `validate_and_refresh`
/// only touches the network when the access token is inside its buffer.
#[derive(Clone)]
pub struct SessionGuard {
    state: SessionState,
    expiry: ExpiryEvaluator,
    refresher: RefreshOrchestrator,
    termination: TerminationHandler,
    endpoint: Arc<dyn TokenEndpoint>,
    timeout: Duration,
}

impl SessionGuard {
    pub fn new(
        state: SessionState,
        expiry: ExpiryEvaluator,
        refresher: RefreshOrchestrator,
        termination: TerminationHandler,
        endpoint: Arc<dyn TokenEndpoint>,
        timeout: Duration,
    ) -> Self {
        Self {
            state,
            expiry,
            refresher,
            termination,
            endpoint,
            timeout,
        }
    }

    /// Both tokens stored and the refresh token outside its buffer.
    /// The access token's own expiry does not matter here.
    pub fn is_authenticated(&self) -> bool {
        match self.state.credentials() {
            Some(pair) => !self.expiry.is_expired(&pair.refresh),
            None => false,
        }
    }

    /// Make sure the session can serve a protected request.
    ///
    /// Terminates the session when it cannot be salvaged.
    pub async fn validate_and_refresh(&self) -> bool {
        self.validate(None).await
    }

    /// Like `validate_and_refresh`, staging `path` as the post-login
    /// destination if the session has to be terminated.
    pub async fn guard_navigation(&self, path: &str) -> bool {
        self.validate(Some(path)).await
    }

    async fn validate(&self, return_path: Option<&str>) -> bool {
        let Some(pair) = self.state.credentials() else {
            debug!("No session, sending to login");
            self.end(return_path, None);
            return false;
        };
        if self.expiry.is_expired(&pair.refresh) {
            warn!("Refresh token expired, ending session");
            self.end(return_path, Some(SESSION_EXPIRED_MESSAGE));
            return false;
        }
        if !self.expiry.is_expired(&pair.access) {
            return true;
        }

        debug!("Access token inside expiry buffer, refreshing");
        match self.refresher.refresh_access_token().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Refresh failed during session validation");
                self.end(return_path, Some(SESSION_EXPIRED_MESSAGE));
                false
            }
        }
    }

    fn end(&self, return_path: Option<&str>, message: Option<&str>) {
        match return_path {
            Some(path) => self.termination.terminate_from(path, message),
            None => self.termination.terminate(message),
        }
    }

    /// Ask the server whether the current access token is still accepted.
    /// Never terminates; any failure reads as invalid.
    pub async fn verify_remote(&self) -> bool {
        let Some(access) = self.state.access_token() else {
            return false;
        };
        match tokio::time::timeout(self.timeout, self.endpoint.verify(&access)).await {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => {
                warn!(error = %e, "Token verification failed");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Token verification timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, RefreshedTokens};
    use crate::auth::clock::ManualClock;
    use crate::auth::termination::tests::RecordingNavigator;
    use crate::session::{CredentialPair, StagedSlots};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_700_000_000;

    fn token(exp: i64) -> String {
        format!(
            "h.{}.s",
            URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{},"token_type":"access","user_id":3}}"#, exp))
        )
    }

    struct Endpoint {
        refresh_calls: AtomicUsize,
        succeed: bool,
        verify_ok: bool,
    }

    #[async_trait]
    impl TokenEndpoint for Endpoint {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedTokens, ApiError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(RefreshedTokens {
                    access: token(NOW + 3600),
                    refresh: None,
                })
            } else {
                Err(ApiError::ServerError("down".into()))
            }
        }

        async fn verify(&self, _token: &str) -> Result<bool, ApiError> {
            Ok(self.verify_ok)
        }
    }

    struct Fixture {
        state: SessionState,
        staged: StagedSlots,
        navigator: Arc<RecordingNavigator>,
        endpoint: Arc<Endpoint>,
        guard: SessionGuard,
    }

    fn fixture(pair: Option<CredentialPair>, succeed: bool) -> Fixture {
        let state = SessionState::new(Arc::new(MemoryStore::new()));
        if let Some(pair) = pair {
            state.establish(pair).unwrap();
        }
        let staged = StagedSlots::new(Arc::new(MemoryStore::new()));
        let navigator = Arc::new(RecordingNavigator::default());
        let endpoint = Arc::new(Endpoint {
            refresh_calls: AtomicUsize::new(0),
            succeed,
            verify_ok: true,
        });
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(NOW, 0).unwrap()));
        let expiry = ExpiryEvaluator::with_default_buffer(clock);
        let timeout = Duration::from_secs(30);
        let refresher = RefreshOrchestrator::new(state.clone(), endpoint.clone(), timeout);
        let termination =
            TerminationHandler::new(state.clone(), staged.clone(), navigator.clone(), "/login");
        let guard = SessionGuard::new(
            state.clone(),
            expiry,
            refresher,
            termination,
            endpoint.clone(),
            timeout,
        );
        Fixture {
            state,
            staged,
            navigator,
            endpoint,
            guard,
        }
    }

    #[test]
    fn test_expired_refresh_token_gates_authentication() {
        let f = fixture(
            Some(CredentialPair::new(token(NOW + 3600), token(NOW - 60))),
            true,
        );
        assert!(!f.guard.is_authenticated());
    }

    #[test]
    fn test_authenticated_with_stale_access_token() {
        let f = fixture(
            Some(CredentialPair::new(token(NOW - 60), token(NOW + 86_400))),
            true,
        );
        assert!(f.guard.is_authenticated());
    }

    #[test]
    fn test_not_authenticated_without_session() {
        let f = fixture(None, true);
        assert!(!f.guard.is_authenticated());
    }

    #[tokio::test]
    async fn test_fresh_access_token_skips_network() {
        let f = fixture(
            Some(CredentialPair::new(token(NOW + 3600), token(NOW + 86_400))),
            true,
        );
        assert!(f.guard.validate_and_refresh().await);
        assert_eq!(f.endpoint.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(f.navigator.redirects().is_empty());
    }

    #[tokio::test]
    async fn test_stale_access_token_is_refreshed() {
        let f = fixture(
            Some(CredentialPair::new(token(NOW + 60), token(NOW + 86_400))),
            true,
        );
        assert!(f.guard.validate_and_refresh().await);
        assert_eq!(f.endpoint.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.state.access_token(), Some(token(NOW + 3600)));
        assert!(f.navigator.redirects().is_empty());
    }

    #[tokio::test]
    async fn test_expired_refresh_token_terminates() {
        let f = fixture(
            Some(CredentialPair::new(token(NOW + 3600), token(NOW - 60))),
            true,
        );
        assert!(!f.guard.validate_and_refresh().await);
        assert_eq!(f.endpoint.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(!f.state.is_present());
        assert_eq!(f.navigator.redirects(), vec!["/login".to_string()]);
        assert_eq!(
            f.staged.take_message().unwrap().as_deref(),
            Some(SESSION_EXPIRED_MESSAGE)
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_terminates() {
        let f = fixture(
            Some(CredentialPair::new(token(NOW + 60), token(NOW + 86_400))),
            false,
        );
        assert!(!f.guard.validate_and_refresh().await);
        assert!(!f.state.is_present());
        assert_eq!(f.navigator.redirects().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_session_redirects_without_message() {
        let f = fixture(None, true);
        assert!(!f.guard.guard_navigation("/checkout").await);
        assert_eq!(f.staged.take_message().unwrap(), None);
        assert_eq!(f.staged.take_return_path().unwrap().as_deref(), Some("/checkout"));
        assert_eq!(f.navigator.redirects().len(), 1);
    }

    #[tokio::test]
    async fn test_verify_remote() {
        let f = fixture(
            Some(CredentialPair::new(token(NOW + 3600), token(NOW + 86_400))),
            true,
        );
        assert!(f.guard.verify_remote().await);

        let empty = fixture(None, true);
        assert!(!empty.guard.verify_remote().await);
        assert!(empty.navigator.redirects().is_empty());
    }
}
