//! Client-side session lifecycle for the dishpatch front-end.
//!
//! Customers, vendors and couriers all authenticate with a short-lived access
//! token and a rotating refresh token. This crate keeps that pair alive:
//! decoding and expiry checks, coalesced refresh, navigation guards, a
//! background refresher and the forced-logout path.

pub mod api;
pub mod auth;
pub mod config;
pub mod service;
pub mod session;
pub mod storage;
pub mod telemetry;

pub use api::{ApiError, RefreshedTokens, TokenApi, TokenEndpoint};
pub use auth::{
    decode_token, AuthInterceptor, AutoRefreshScheduler, Clock, ExpiryEvaluator, ManualClock,
    Navigator, RefreshError, RefreshOrchestrator, RefreshTaskHandle, SessionGuard, SystemClock,
    TerminationHandler, TickOutcome, TokenClaims, SESSION_EXPIRED_MESSAGE,
};
pub use config::SessionConfig;
pub use service::{SessionBackends, SessionService};
pub use session::{CredentialPair, SessionState, StagedSlots};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
