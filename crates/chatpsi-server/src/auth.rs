//! Request authentication.
//!
//! End users present an identity-provider [`AccessToken`]; the processor
//! callback and the admin API use static shared secrets compared in constant
//! time.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use chatpsi_shared::credential::AccessToken;
use chatpsi_shared::UserId;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;

/// The authenticated caller, derived from a verified bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
}

pub fn actor_from_bearer(token: &str, config: &ServerConfig) -> Result<Actor, ServerError> {
    let token =
        AccessToken::decode(token).map_err(|e| ServerError::Unauthorized(e.to_string()))?;
    let user_id = token
        .verify(&config.identity_pubkey)
        .map_err(|e| ServerError::Unauthorized(e.to_string()))?;
    Ok(Actor { user_id })
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

impl FromRequestParts<AppState> for Actor {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers)
            .ok_or_else(|| ServerError::Unauthorized("missing bearer token".into()))?;
        actor_from_bearer(token, &state.config)
    }
}

fn secret_matches(headers: &HeaderMap, expected: &str) -> bool {
    let presented = bearer(headers).unwrap_or("").as_bytes();
    let expected = expected.as_bytes();
    presented.len() == expected.len() && presented.ct_eq(expected).unwrap_u8() == 1
}

pub fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };
    if !secret_matches(headers, expected) {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }
    Ok(())
}

pub fn verify_webhook_secret(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.webhook_secret else {
        return Err(ServerError::Forbidden(
            "Reply callback is disabled (no WEBHOOK_SECRET configured)".into(),
        ));
    };
    if !secret_matches(headers, expected) {
        return Err(ServerError::Unauthorized("Invalid webhook secret".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use uuid::Uuid;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn test_actor_from_valid_token() {
        let provider = SigningKey::generate(&mut OsRng);
        let config = ServerConfig {
            identity_pubkey: provider.verifying_key().to_bytes(),
            ..ServerConfig::default()
        };
        let user = UserId(Uuid::new_v4());
        let token = AccessToken::issue(user, Utc::now() + Duration::hours(1), &provider);

        let actor = actor_from_bearer(&token.encode(), &config).unwrap();
        assert_eq!(actor.user_id, user);
    }

    #[test]
    fn test_actor_rejects_foreign_token() {
        let provider = SigningKey::generate(&mut OsRng);
        let config = ServerConfig::default();
        let token = AccessToken::issue(
            UserId(Uuid::new_v4()),
            Utc::now() + Duration::hours(1),
            &provider,
        );

        assert!(matches!(
            actor_from_bearer(&token.encode(), &config),
            Err(ServerError::Unauthorized(_))
        ));
        assert!(matches!(
            actor_from_bearer("garbage", &config),
            Err(ServerError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_admin_token() {
        let mut config = ServerConfig::default();
        assert!(verify_admin_token(&headers("Bearer x"), &config).is_err());

        config.admin_token = Some("hunter2".into());
        assert!(verify_admin_token(&headers("Bearer hunter2"), &config).is_ok());
        assert!(verify_admin_token(&headers("Bearer hunter3"), &config).is_err());
        assert!(verify_admin_token(&headers("hunter2"), &config).is_err());
    }

    #[test]
    fn test_webhook_secret() {
        let config = ServerConfig {
            webhook_secret: Some("cb-secret".into()),
            ..ServerConfig::default()
        };
        assert!(verify_webhook_secret(&headers("Bearer cb-secret"), &config).is_ok());
        assert!(matches!(
            verify_webhook_secret(&HeaderMap::new(), &config),
            Err(ServerError::Unauthorized(_))
        ));
    }
}
