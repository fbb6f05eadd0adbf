//! Reactive refresh around protected API calls.
//!
//! A call that comes back `401` gets one coalesced refresh and one retry.
//! A second `401`, or a failed refresh, ends the session.

use std::future::Future;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::refresh::RefreshOrchestrator;
use super::termination::TerminationHandler;
use crate::api::{check_response, ApiError};
use crate::session::SessionState;

#[derive(Clone)]
pub struct AuthInterceptor {
    state: SessionState,
    refresher: RefreshOrchestrator,
    termination: TerminationHandler,
}

impl AuthInterceptor {
    pub fn new(
        state: SessionState,
        refresher: RefreshOrchestrator,
        termination: TerminationHandler,
    ) -> Self {
        Self {
            state,
            refresher,
            termination,
        }
    }

    /// Run `call` with the current access token.
    ///
    /// `call` may be invoked twice: once with the stored token and, after a
    /// `401`, once more with the refreshed one.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, ApiError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let Some(token) = self.state.access_token() else {
            debug!("Protected call without a session");
            self.termination.terminate(None);
            return Err(ApiError::Unauthorized);
        };

        match call(token.clone()).await {
            Err(ApiError::Unauthorized) => {}
            other => return other,
        }

        // Another path may already have refreshed while this call was out
        let fresh = match self.state.access_token() {
            Some(current) if current != token => current,
            _ => {
                debug!("Request unauthorized, refreshing access token");
                match self.refresher.refresh_access_token().await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(error = %e, "Refresh after 401 failed");
                        self.termination.terminate_expired();
                        return Err(ApiError::Unauthorized);
                    }
                }
            }
        };

        match call(fresh).await {
            Err(ApiError::Unauthorized) => {
                warn!("Request still unauthorized after refresh");
                self.termination.terminate_expired();
                Err(ApiError::Unauthorized)
            }
            other => other,
        }
    }

    /// Authenticated GET returning parsed JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, client: &Client, url: &str) -> Result<T, ApiError> {
        self.execute(|token| async move {
            let response = client.get(url).bearer_auth(token).send().await?;
            let response = check_response(response).await?;
            response
                .json::<T>()
                .await
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e)))
        })
        .await
    }
}
