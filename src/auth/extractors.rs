use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::{jwt::JwtKeys, repo_types::User};
use crate::error::AppError;

/// User rebuilt from a valid `Authorization: Bearer <token>` header.
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(AppError::invalid_session)?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(AppError::invalid_session)?;

        let keys = JwtKeys::from_ref(state);
        let user = keys.verify_access(token.trim()).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            AppError::from(e)
        })?;
        Ok(CurrentUser(user))
    }
}

/// Like [`CurrentUser`], but rejects accounts whose token says `disabled`.
pub struct ActiveUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for ActiveUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.disabled {
            return Err(AppError::BadRequest("Inactive user".into()));
        }
        Ok(ActiveUser(user))
    }
}
