//! Anthropic OAuth authentication library
//!
//! Provides PKCE flow generation, token exchange/refresh, and the OAuth
//! Manager that drives account authorization and on-demand refresh with
//! single-flight coalescing. This crate has no dependency on the gateway
//! binary — it can be tested and used independently.
//!
//! Credential flow:
//! 1. `OAuthManager::authorize()` generates a PKCE verifier/challenge and
//!    persists a short-lived session via `storage::AccountStore`.
//! 2. The user authorizes in their browser against the returned URL.
//! 3. `OAuthManager::complete()` exchanges the code and persists a new
//!    `storage::Account`.
//! 4. `OAuthManager::ensure_access_token()` refreshes on demand, never
//!    in the background, coalescing concurrent callers per account id.

pub mod constants;
pub mod error;
pub mod manager;
pub mod pkce;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use manager::{OAuthManager, SESSION_TTL_MS};
pub use pkce::{build_authorization_url, compute_challenge, generate_verifier};
pub use token::{TokenResponse, exchange_code, refresh_token};
