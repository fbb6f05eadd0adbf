use std::sync::Arc;

use tracing::{error, info, warn};

use crate::session::{SessionState, StagedSlots};

/// Shown once on the login screen after a forced logout.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Default entry point users are sent to after termination.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Full-page navigation capability of the host.
///
/// Implementations must discard all in-memory application state, the way a
/// browser does on a hard location change.
pub trait Navigator: Send + Sync {
    fn hard_redirect(&self, path: &str);
}

/// Ends the session: wipes session storage, stages an optional message and
/// hard-redirects to the login entry point.
#[derive(Clone)]
pub struct TerminationHandler {
    state: SessionState,
    staged: StagedSlots,
    navigator: Arc<dyn Navigator>,
    login_path: String,
}

impl TerminationHandler {
    pub fn new(
        state: SessionState,
        staged: StagedSlots,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            state,
            staged,
            navigator,
            login_path: login_path.into(),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Storage failures are logged; the redirect always happens.
    pub fn terminate(&self, message: Option<&str>) {
        if let Err(e) = self.state.teardown() {
            error!(error = %e, "Failed to clear session storage");
        }
        if let Some(message) = message {
            if let Err(e) = self.staged.stage_message(message) {
                warn!(error = %e, "Failed to stage redirect message");
            }
        }
        info!(login_path = %self.login_path, "Session terminated, redirecting to login");
        self.navigator.hard_redirect(&self.login_path);
    }

    /// Terminate with the standard session-expired message.
    pub fn terminate_expired(&self) {
        self.terminate(Some(SESSION_EXPIRED_MESSAGE));
    }

    /// Terminate, remembering `return_path` for after the next login.
    pub fn terminate_from(&self, return_path: &str, message: Option<&str>) {
        if let Err(e) = self.staged.stage_return_path(return_path) {
            warn!(error = %e, "Failed to stage return path");
        }
        self.terminate(message);
    }
}
