//! Session state shared by every authenticated code path.
//!
//! This module provides:
//! - `SessionState`: the credential pair, loaded at startup and kept in sync
//!   with durable storage
//! - `StagedSlots`: one-shot values that survive a reload (login-screen
//!   message, post-login return path)

pub mod staged;
pub mod state;

pub use staged::StagedSlots;
pub use state::{CredentialPair, RefreshApplied, SessionState};
