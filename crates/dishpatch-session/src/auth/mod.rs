//! Authentication session lifecycle.
//!
//! This module provides:
//! - `decode_token` / `TokenClaims`: unverified payload decoding
//! - `ExpiryEvaluator`: buffered expiry checks against an injectable `Clock`
//! - `RefreshOrchestrator`: refresh-token exchange, coalesced across callers
//! - `SessionGuard`: navigation-time validation
//! - `AutoRefreshScheduler`: proactive refresh on a timer
//! - `AuthInterceptor`: refresh-and-retry around protected API calls
//! - `TerminationHandler`: forced logout with a hard redirect
//!
//! Tokens are treated as expired 5 minutes before their `exp`.

pub mod clock;
pub mod expiry;
pub mod guard;
pub mod interceptor;
pub mod refresh;
pub mod scheduler;
pub mod termination;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use expiry::ExpiryEvaluator;
pub use guard::SessionGuard;
pub use interceptor::AuthInterceptor;
pub use refresh::{RefreshError, RefreshOrchestrator};
pub use scheduler::{AutoRefreshScheduler, RefreshTaskHandle, TickOutcome};
pub use termination::{Navigator, TerminationHandler, SESSION_EXPIRED_MESSAGE};
pub use token::{decode_token, TokenClaims};
