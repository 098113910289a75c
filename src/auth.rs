//! Pluggable JWT verification and the `Authenticated` extractor, grounded on
//! the teacher's `auth::extractors::Authenticated<T>` (`FromRequestParts`
//! pulling a session out of request extensions), generalized from a
//! session-lookup to direct JWT claim verification.

use crate::error::ApiError;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Claims carried by every issued token. `roles` gates the admin-only
/// endpoints of `SPEC_FULL.md` §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: usize,
}

impl Claims {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.sub
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}

/// Verifies a bearer token and returns its claims. Pluggable so the HMAC
/// secret (or eventually an external IdP) can be swapped without touching
/// the extractor or the WS handshake.
#[derive(Clone)]
pub struct VerifyToken {
    decoding_key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl VerifyToken {
    #[must_use]
    pub fn from_hmac_secret(secret: &str) -> Self {
        Self {
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(Validation::default()),
        }
    }

    /// # Errors
    /// Returns `ApiError::Unauthorized` if the token is malformed, expired,
    /// or fails signature verification.
    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized)
    }
}

/// Extracts and verifies the bearer token from the `Authorization` header,
/// yielding the caller's claims. Rejects with 401 if absent or invalid.
pub struct Authenticated(pub Claims);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
    VerifyToken: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = VerifyToken::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
        let claims = verifier.verify(token)?;
        Ok(Self(claims))
    }
}

/// Same as `Authenticated` but additionally requires the `admin` role,
/// mirroring the teacher's `admin.roles.contains(&"admin")` check in
/// `handlers/job_admin.rs`.
pub struct AuthenticatedAdmin(pub Claims);

impl<S> FromRequestParts<S> for AuthenticatedAdmin
where
    S: Send + Sync,
    VerifyToken: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Authenticated(claims) = Authenticated::from_request_parts(parts, state).await?;
        if !claims.is_admin() {
            return Err(ApiError::Forbidden("admin role required".into()));
        }
        Ok(Self(claims))
    }
}

/// Helper used by the WS handshake, which carries the token as a query
/// parameter rather than a header.
#[must_use]
pub fn unauthorized_status() -> StatusCode {
    StatusCode::UNAUTHORIZED
}
