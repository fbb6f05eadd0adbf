//! REST client for the platform's token endpoints.
//!
//! This module provides the `TokenEndpoint` seam used by the refresh and
//! verify paths, and `TokenApi`, its reqwest implementation against
//! `<api-base>/token/refresh/` and `<api-base>/token/verify/`.

pub mod client;
pub mod error;

pub use client::{check_response, RefreshedTokens, TokenApi, TokenEndpoint};
pub use error::ApiError;
