//! Bearer token verification for node handshakes

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{AUTHORIZATION_HEADER, AuthError, Verifier, header, parse_id};
use crate::nodes::NodeIdentity;

/// Claims carried by a node token
#[derive(Debug, Deserialize)]
pub struct NodeClaims {
    /// Node id
    pub id: String,
    /// Organization id
    #[serde(rename = "groupId")]
    pub group_id: String,
}

/// Validates HMAC-signed node tokens against a shared secret
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // Node tokens are long-lived; `exp` is checked only when present
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Decode a raw token into a node identity
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the signature, expiry or id claims are invalid
    pub fn verify_token(&self, token: &str) -> Result<NodeIdentity, AuthError> {
        let data = decode::<NodeClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Ok(NodeIdentity {
            node_id: parse_id("node id", &data.claims.id)?,
            organization_id: parse_id("organization id", &data.claims.group_id)?,
        })
    }
}

impl Verifier for JwtVerifier {
    fn verify(&self, headers: &HeaderMap) -> Result<NodeIdentity, AuthError> {
        let token = header(headers, AUTHORIZATION_HEADER)?;
        self.verify_token(token)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    const SECRET: &str = "node-secret";

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(&SecretString::from(SECRET.to_string()))
    }

    fn token(claims: &serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION_HEADER,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn valid_token_yields_identity() {
        let node_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();
        let t = token(&json!({"id": node_id, "groupId": org_id}), SECRET);

        let identity = verifier().verify(&headers_with(&t)).unwrap();
        assert_eq!(identity.node_id, node_id);
        assert_eq!(identity.organization_id, org_id);
    }

    #[test]
    fn raw_token_without_bearer_prefix_is_accepted() {
        let t = token(&json!({"id": Uuid::new_v4(), "groupId": Uuid::new_v4()}), SECRET);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION_HEADER, HeaderValue::from_str(&t).unwrap());
        assert!(verifier().verify(&headers).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let t = token(&json!({"id": Uuid::new_v4(), "groupId": Uuid::new_v4()}), "other");
        assert!(matches!(
            verifier().verify(&headers_with(&t)),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let t = token(
            &json!({"id": Uuid::new_v4(), "groupId": Uuid::new_v4(), "exp": 1_000}),
            SECRET,
        );
        assert!(verifier().verify(&headers_with(&t)).is_err());
    }

    #[test]
    fn non_uuid_claim_is_rejected() {
        let t = token(&json!({"id": "1224887889", "groupId": Uuid::new_v4()}), SECRET);
        assert!(matches!(
            verifier().verify(&headers_with(&t)),
            Err(AuthError::InvalidId { field: "node id", .. })
        ));
    }

    #[test]
    fn missing_claim_is_rejected() {
        let t = token(&json!({"id": Uuid::new_v4()}), SECRET);
        assert!(verifier().verify(&headers_with(&t)).is_err());
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(matches!(
            verifier().verify(&HeaderMap::new()),
            Err(AuthError::MissingHeader(_))
        ));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(verifier().verify(&headers_with("not.a.jwt")).is_err());
    }
}
