//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge used during the OAuth
//! authorization flow. The verifier is stored server-side and sent during
//! token exchange; the challenge is included in the authorization URL so
//! the authorization server can verify the exchange request came from the
//! same party that initiated the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::{
    ANTHROPIC_CLIENT_ID, AUTHORIZE_ENDPOINT, CONSOLE_AUTHORIZE_ENDPOINT, REDIRECT_URI, SCOPES,
};

/// Generate a cryptographically random PKCE code verifier.
///
/// Produces a 128-byte random value encoded as URL-safe base64 (no padding).
/// RFC 7636 requires 43-128 characters; our output is 172 characters
/// (128 bytes * 4/3, rounded), well within the spec range.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 128];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
///
/// The authorization server compares this against the challenge sent in
/// the authorization URL to verify the token exchange request is legitimate.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the full authorization URL with all required OAuth parameters.
///
/// The host varies by mode: `console` authorizes against the Console
/// OAuth app, anything else (`max`, the Pro/Max subscription flow) goes
/// to the claude.ai host. The `state` parameter is an opaque value the
/// client generates for CSRF protection; the authorization server
/// returns it unchanged in the callback.
pub fn build_authorization_url(mode: &str, state: &str, challenge: &str) -> String {
    let host = if mode == "console" {
        CONSOLE_AUTHORIZE_ENDPOINT
    } else {
        AUTHORIZE_ENDPOINT
    };
    format!(
        "{}?code=true&client_id={}&redirect_uri={}&response_type=code&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
        host,
        ANTHROPIC_CLIENT_ID,
        urlencoded(REDIRECT_URI),
        urlencoded(SCOPES),
        challenge,
        state,
    )
}

/// Minimal URL encoding for parameter values.
/// Only encodes characters that would break URL parameter parsing.
fn urlencoded(s: &str) -> String {
    s.replace(' ', "%20")
        .replace(':', "%3A")
        .replace('/', "%2F")
}
