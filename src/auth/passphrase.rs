//! Header-based node handshakes authenticated by a shared passphrase

use axum::http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};

use super::{
    AUTHORIZATION_HEADER, AuthError, GROUP_ID_HEADER, ROUTER_ID_HEADER, Verifier, header, parse_id,
};
use crate::nodes::NodeIdentity;

/// Accepts nodes presenting the deployment passphrase
pub struct PassphraseVerifier {
    passphrase: SecretString,
}

impl PassphraseVerifier {
    /// Create a verifier for the given passphrase
    #[must_use]
    pub fn new(passphrase: &SecretString) -> Self {
        Self {
            passphrase: SecretString::from(passphrase.expose_secret().to_string()),
        }
    }
}

impl Verifier for PassphraseVerifier {
    fn verify(&self, headers: &HeaderMap) -> Result<NodeIdentity, AuthError> {
        let provided = header(headers, AUTHORIZATION_HEADER)?;
        let node_id = header(headers, ROUTER_ID_HEADER)?;
        let organization_id = header(headers, GROUP_ID_HEADER)?;

        if !constant_time_eq(
            self.passphrase.expose_secret().as_bytes(),
            provided.as_bytes(),
        ) {
            return Err(AuthError::InvalidPassphrase);
        }

        Ok(NodeIdentity {
            node_id: parse_id("node id", node_id)?,
            organization_id: parse_id("organization id", organization_id)?,
        })
    }
}

/// Constant-time byte comparison
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
