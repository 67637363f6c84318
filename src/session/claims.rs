//! Access token claims

use super::SessionError;
use crate::Secret;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decoded access token payload
///
/// Only the claims the gateway acts on are modelled; the rest of the payload
/// is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id issued by the identity service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Expiry as seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl TokenClaims {
    /// A token without an expiry claim counts as expired
    pub fn is_expired(&self, now: i64, buffer_secs: i64) -> bool {
        match self.exp {
            Some(exp) => exp <= now.saturating_add(buffer_secs),
            None => true,
        }
    }

    pub fn user_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Decode the claims of an access token
///
/// With a secret the HS256 signature is verified. Without one the payload is
/// read as-is; the identity service stays the authority on the token.
pub fn decode_claims(token: &str, secret: Option<&Secret>) -> Result<TokenClaims, SessionError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let key = match secret {
        Some(secret) => DecodingKey::from_secret(secret.expose().as_bytes()),
        None => {
            validation.insecure_disable_signature_validation();
            DecodingKey::from_secret(&[])
        }
    };

    decode::<TokenClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| SessionError::TokenDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn token(claims: Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let claims = TokenClaims {
            id: None,
            exp: Some(1_000),
        };
        assert!(!claims.is_expired(999, 0));
        assert!(claims.is_expired(1_000, 0));
        assert!(claims.is_expired(1_001, 0));

        assert!(!claims.is_expired(989, 10));
        assert!(claims.is_expired(990, 10));
    }

    #[test]
    fn test_missing_exp_is_expired() {
        let claims = TokenClaims { id: None, exp: None };
        assert!(claims.is_expired(0, 0));
    }

    #[test]
    fn test_decode_unverified() {
        let jwt = token(json!({"id": "user-1", "exp": 4_000_000_000i64, "role": "x"}), "anything");
        let claims = decode_claims(&jwt, None).unwrap();
        assert_eq!(claims.exp, Some(4_000_000_000));
        assert_eq!(claims.user_id().as_deref(), Some("user-1"));
    }

    #[test]
    fn test_decode_expired_token_still_yields_claims() {
        let jwt = token(json!({"id": 5, "exp": 10}), "anything");
        let claims = decode_claims(&jwt, None).unwrap();
        assert!(claims.is_expired(11, 0));
        assert_eq!(claims.user_id().as_deref(), Some("5"));
    }

    #[test]
    fn test_decode_verified() {
        let secret = Secret::new("shared-secret");
        let jwt = token(json!({"id": "u", "exp": 4_000_000_000i64}), "shared-secret");
        assert!(decode_claims(&jwt, Some(&secret)).is_ok());

        let forged = token(json!({"id": "u", "exp": 4_000_000_000i64}), "other");
        assert!(matches!(
            decode_claims(&forged, Some(&secret)),
            Err(SessionError::TokenDecode(_))
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_claims("not-a-jwt", None).is_err());
        assert!(decode_claims("", None).is_err());
    }
}
