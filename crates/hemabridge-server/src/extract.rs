//! Bearer-token authentication extractor.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use hemabridge_core::auth::AuthError;
use hemabridge_core::policy::{self, Action, PolicyError};
use hemabridge_core::store::User;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller, loaded fresh from the store on every request.
///
/// Rejects with 401 when the `Authorization: Bearer` header is missing,
/// malformed, forged or expired, or names a deleted user; with 403 when the
/// account is inactive.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    /// Checks the caller's role against `action`.
    pub fn require(&self, action: Action) -> Result<(), PolicyError> {
        policy::require(self.0.role, action)
    }

    /// The caller's user id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.0.id
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::InvalidToken)?;
        let claims = state.tokens.verify(token)?;
        let user_id = claims.user_id()?;
        let user = state
            .db(move |store| store.user_by_id(user_id))
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if !user.is_active {
            tracing::info!(user_id = user.id, "inactive account rejected");
            return Err(AuthError::InactiveAccount.into());
        }
        Ok(Self(user))
    }
}
