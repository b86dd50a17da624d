//! Node handshake verification
//!
//! A deployment runs exactly one strategy:
//! - Token: `Authorization` carries a signed JWT with `id` and `groupId` claims
//! - Passphrase: `Authorization` carries a shared passphrase, `X-Router-ID`
//!   and `X-Group-ID` carry the node and organization ids
//!
//! Verification fails closed and has no side effects. The transport is only
//! upgraded after it succeeds.

pub mod jwt;
pub mod passphrase;

use std::sync::Arc;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AuthConfig;
use crate::nodes::NodeIdentity;

pub use jwt::JwtVerifier;
pub use passphrase::PassphraseVerifier;

/// Header carrying the token or passphrase
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Header carrying the node id in passphrase mode
pub const ROUTER_ID_HEADER: &str = "x-router-id";

/// Header carrying the organization id in passphrase mode
pub const GROUP_ID_HEADER: &str = "x-group-id";

/// Why a handshake was rejected
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required header is absent or not valid ASCII
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    /// The token failed to decode or validate
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// An identity field is not a UUID
    #[error("bad {field} {value:?}: {reason}")]
    InvalidId {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// The passphrase did not match
    #[error("passphrase mismatch")]
    InvalidPassphrase,
}

/// Which handshake scheme a deployment uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Signed bearer token
    #[default]
    Token,

    /// Shared passphrase with id headers
    Passphrase,
}

impl AuthMode {
    /// Parse from string representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "token" | "jwt" => Some(Self::Token),
            "passphrase" | "password" | "headers" => Some(Self::Passphrase),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Passphrase => write!(f, "passphrase"),
        }
    }
}

/// Turns handshake metadata into a node identity
pub trait Verifier: Send + Sync {
    /// Verify the handshake headers
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when any credential is missing or invalid
    fn verify(&self, headers: &HeaderMap) -> Result<NodeIdentity, AuthError>;
}

/// Build the verifier selected by configuration
#[must_use]
pub fn verifier_from_config(config: &AuthConfig) -> Arc<dyn Verifier> {
    match config.mode {
        AuthMode::Token => Arc::new(JwtVerifier::new(&config.secret)),
        AuthMode::Passphrase => Arc::new(PassphraseVerifier::new(&config.secret)),
    }
}

/// Read a header as a string, stripping an optional `Bearer ` prefix for
/// the authorization header
fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AuthError> {
    let value = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingHeader(name))?;

    if name == AUTHORIZATION_HEADER {
        return Ok(value.strip_prefix("Bearer ").unwrap_or(value).trim());
    }
    Ok(value)
}

fn parse_id(field: &'static str, value: &str) -> Result<uuid::Uuid, AuthError> {
    uuid::Uuid::parse_str(value).map_err(|e| AuthError::InvalidId {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn parse_auth_mode() {
        assert_eq!(AuthMode::parse("token"), Some(AuthMode::Token));
        assert_eq!(AuthMode::parse("JWT"), Some(AuthMode::Token));
        assert_eq!(AuthMode::parse("passphrase"), Some(AuthMode::Passphrase));
        assert_eq!(AuthMode::parse("open"), None);
    }

    #[test]
    fn authorization_header_strips_bearer() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            header(&headers, AUTHORIZATION_HEADER),
            Err(AuthError::MissingHeader(_))
        ));

        headers.insert(AUTHORIZATION_HEADER, HeaderValue::from_static("Bearer abc"));
        assert_eq!(header(&headers, AUTHORIZATION_HEADER).unwrap(), "abc");

        headers.insert(AUTHORIZATION_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(header(&headers, AUTHORIZATION_HEADER).unwrap(), "abc");
    }

    #[test]
    fn empty_header_counts_as_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(ROUTER_ID_HEADER, HeaderValue::from_static("  "));
        assert!(matches!(
            header(&headers, ROUTER_ID_HEADER),
            Err(AuthError::MissingHeader(ROUTER_ID_HEADER))
        ));
    }
}
