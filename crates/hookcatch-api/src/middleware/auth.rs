//! Bearer JWT authentication for the admin endpoints.
//!
//! Tokens are HS256-signed with `JWT_SECRET`. `exp` is enforced against the
//! service clock when present; tokens without `exp` never expire. A blank
//! secret rejects every token.

use std::{collections::HashSet, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hookcatch_core::{Clock, HookCatchError};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{handlers::ApiError, AppState};

/// Claims read from an admin token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Subject, when the issuer sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Expiry as Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Errors that can occur during admin authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The Authorization header is missing from the request.
    MissingHeader,
    /// Signature, algorithm or claims did not check out.
    InvalidToken,
    /// `exp` is in the past.
    Expired,
    /// No JWT secret configured.
    NotConfigured,
}

impl AuthError {
    fn reason(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing bearer token",
            Self::InvalidToken => "invalid token",
            Self::Expired => "token expired",
            Self::NotConfigured => "admin authentication not configured",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError(HookCatchError::Unauthorized { reason: self.reason().to_string() })
            .into_response()
    }
}

/// Verifies admin bearer tokens.
#[derive(Clone)]
pub struct AdminAuth {
    key: Option<DecodingKey>,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl AdminAuth {
    /// Creates a verifier for `secret`; blank secrets verify nothing.
    pub fn new(secret: &str, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is optional and checked against `clock` below.
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        let key = (!secret.trim().is_empty()).then(|| DecodingKey::from_secret(secret.as_bytes()));
        Self { key, validation, clock }
    }

    /// Checks a raw token.
    ///
    /// # Errors
    ///
    /// Returns why the token is not acceptable.
    pub fn verify(&self, token: &str) -> Result<AdminClaims, AuthError> {
        let key = self.key.as_ref().ok_or(AuthError::NotConfigured)?;

        let claims = decode::<AdminClaims>(token, key, &self.validation)
            .map_err(|err| {
                debug!(error = %err, "admin token rejected");
                AuthError::InvalidToken
            })?
            .claims;

        if claims.exp.is_some_and(|exp| self.clock.unix_timestamp() > exp) {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }

    /// Checks the `Authorization` header of a request.
    ///
    /// # Errors
    ///
    /// Returns `MissingHeader` when there is no token, otherwise as
    /// [`AdminAuth::verify`].
    pub fn authorize(&self, headers: &HeaderMap) -> Result<AdminClaims, AuthError> {
        let token = extract_bearer_token(headers).ok_or(AuthError::MissingHeader)?;
        self.verify(token)
    }
}

/// Extracts the token from `Authorization: Bearer <token>`.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).trim())
        .filter(|s| !s.is_empty())
}

/// Axum middleware guarding the admin routes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let claims = state.admin_auth.authorize(req.headers()).inspect_err(|err| {
        warn!(reason = err.reason(), path = %req.uri().path(), "admin request rejected");
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use axum::http::HeaderValue;
    use hookcatch_core::TestClock;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn auth(secret: &str) -> AdminAuth {
        let clock = TestClock::with_start_time(UNIX_EPOCH + Duration::from_secs(NOW));
        AdminAuth::new(secret, Arc::new(clock))
    }

    fn token(secret: &str, exp: Option<i64>) -> String {
        let claims = AdminClaims { sub: Some("ops".into()), exp };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn extract_bearer_token_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi"));

        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn accepts_token_without_expiry() {
        let claims = auth("jwt").verify(&token("jwt", None)).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("ops"));
    }

    #[test]
    fn enforces_expiry_against_clock() {
        let now = i64::try_from(NOW).unwrap();
        assert!(auth("jwt").verify(&token("jwt", Some(now + 60))).is_ok());
        assert_eq!(auth("jwt").verify(&token("jwt", Some(now - 1))), Err(AuthError::Expired));
    }

    #[test]
    fn rejects_wrong_key_and_garbage() {
        assert_eq!(auth("jwt").verify(&token("other", None)), Err(AuthError::InvalidToken));
        assert_eq!(auth("jwt").verify("not-a-jwt"), Err(AuthError::InvalidToken));
    }

    #[test]
    fn blank_secret_rejects_everything() {
        assert_eq!(auth("").verify(&token("", None)), Err(AuthError::NotConfigured));
    }

    #[test]
    fn authorize_requires_header() {
        assert_eq!(auth("jwt").authorize(&HeaderMap::new()), Err(AuthError::MissingHeader));
    }
}
