//! JWT session token creation and verification.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{api::models::users::CurrentUser, config::Config, errors::Error};

/// JWT session claims
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Username
    pub sub: String,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

impl SessionClaims {
    pub fn new(user: &CurrentUser, config: &Config) -> Self {
        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(config.auth.session.timeout).unwrap_or(chrono::Duration::hours(24));

        Self {
            sub: user.username.clone(),
            is_admin: user.is_admin,
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
        }
    }
}

impl From<SessionClaims> for CurrentUser {
    fn from(claims: SessionClaims) -> Self {
        Self {
            username: claims.sub,
            is_admin: claims.is_admin,
        }
    }
}

fn secret(config: &Config) -> Result<&str, Error> {
    config
        .secret_key
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Internal {
            operation: "JWT sessions: secret_key is required".to_string(),
        })
}

/// Mint a session token. Login lives elsewhere; used by tooling and tests.
pub fn create_session_token(user: &CurrentUser, config: &Config) -> Result<String, Error> {
    let claims = SessionClaims::new(user, config);
    let key = EncodingKey::from_secret(secret(config)?.as_bytes());
    encode(&Header::default(), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify and decode a session token
pub fn verify_session_token(token: &str, config: &Config) -> Result<CurrentUser, Error> {
    let key = DecodingKey::from_secret(secret(config)?.as_bytes());

    let token_data = decode::<SessionClaims>(token, &key, &Validation::default()).map_err(|e| match e.kind() {
        // Client errors (401)
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => Error::Unauthenticated { message: None },

        // Key or crypto failures are ours (500)
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    })?;

    if token_data.claims.sub.trim().is_empty() {
        return Err(Error::Unauthenticated { message: None });
    }

    Ok(CurrentUser::from(token_data.claims))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            secret_key: Some("test-secret-key-for-jwt".to_string()),
            ..Default::default()
        }
    }

    fn alice() -> CurrentUser {
        CurrentUser {
            username: "alice".to_string(),
            is_admin: false,
        }
    }

    #[test]
    fn test_create_and_verify_session_token() {
        let config = config();
        let token = create_session_token(&alice(), &config).unwrap();
        assert!(!token.is_empty());

        let user = verify_session_token(&token, &config).unwrap();
        assert_eq!(user, alice());
    }

    #[test]
    fn test_verify_token_wrong_secret() {
        let mut config = config();
        let token = create_session_token(&alice(), &config).unwrap();

        config.secret_key = Some("different-secret".to_string());
        let err = verify_session_token(&token, &config).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_verify_garbage_token() {
        let err = verify_session_token("invalid.token.here", &config()).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_verify_expired_token() {
        let config = config();
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "alice".to_string(),
            is_admin: false,
            exp: now - 3600,
            iat: now - 7200,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-for-jwt"),
        )
        .unwrap();

        let err = verify_session_token(&token, &config).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_missing_secret_is_internal() {
        let err = create_session_token(&alice(), &Config::default()).unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }
}
