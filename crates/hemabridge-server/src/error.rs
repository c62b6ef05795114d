//! API error type.
//!
//! Every handler returns `Result<_, ApiError>`. Core errors convert with `?`
//! and are mapped to a status code and a `{"detail": ...}` body here.

use axum::Json;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{FormRejection, JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use hemabridge_core::auth::AuthError;
use hemabridge_core::model::ModelError;
use hemabridge_core::policy::PolicyError;
use hemabridge_core::report::ReportError;
use hemabridge_core::risk::RiskError;
use hemabridge_core::store::StoreError;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;

const INTERNAL_DETAIL: &str = "internal server error";

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body or parameters are unusable.
    #[error("{0}")]
    BadRequest(String),

    /// A referenced resource does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of resource.
        entity: &'static str,
        /// Requested id.
        id: i64,
    },

    /// Authentication failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Role does not permit the action.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Model boundary failure.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Classification input rejected.
    #[error(transparent)]
    Risk(#[from] RiskError),

    /// PDF rendering failure.
    #[error(transparent)]
    Report(#[from] ReportError),

    /// A task on the blocking pool panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Blocking(#[from] JoinError),
}

impl ApiError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::Risk(_)
            | Self::Store(StoreError::Duplicate { .. })
            | Self::Model(ModelError::InvalidImage { .. } | ModelError::LowConfidence { .. }) => {
                StatusCode::BAD_REQUEST
            },
            Self::NotFound { .. } | Self::Store(StoreError::NotFound { .. }) => {
                StatusCode::NOT_FOUND
            },
            Self::Auth(
                AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::TokenExpired,
            ) => StatusCode::UNAUTHORIZED,
            Self::Auth(AuthError::InactiveAccount) | Self::Policy(_) => StatusCode::FORBIDDEN,
            Self::Auth(AuthError::Throttled { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Auth(_)
            | Self::Store(_)
            | Self::Model(_)
            | Self::Report(_)
            | Self::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Store(StoreError::Duplicate { .. } | StoreError::NotFound { .. })
            | Self::Model(_)
            | Self::Auth(
                AuthError::InvalidCredentials
                | AuthError::InvalidToken
                | AuthError::TokenExpired
                | AuthError::InactiveAccount
                | AuthError::Throttled { .. },
            ) => self.to_string(),
            Self::Store(_) | Self::Auth(_) | Self::Blocking(_) => INTERNAL_DETAIL.to_string(),
            Self::Report(_) => "report generation failed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let mut response = (status, Json(json!({ "detail": self.detail() }))).into_response();
        match &self {
            Self::Auth(AuthError::Throttled { retry_after_secs }) => {
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            },
            _ if status == StatusCode::UNAUTHORIZED => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            },
            _ => {},
        }
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        Self::BadRequest(format!("malformed upload: {}", error.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::bad_request("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Store(StoreError::Duplicate { field: "email" }).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Store(StoreError::LockPoisoned).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Store(StoreError::NotFound {
                entity: "doctor",
                id: 3
            })
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Auth(AuthError::TokenExpired).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Auth(AuthError::InactiveAccount).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Auth(AuthError::Throttled {
                retry_after_secs: 60
            })
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Model(ModelError::LowConfidence {
                confidence: 20.0,
                threshold: 30.0
            })
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Model(ModelError::ModelUnavailable {
                reason: "runner missing".into()
            })
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_storage_details_are_not_exposed() {
        let error = ApiError::Store(StoreError::LockPoisoned);
        assert_eq!(error.detail(), INTERNAL_DETAIL);

        let error = ApiError::Auth(AuthError::Hashing {
            message: "salt failure".into(),
        });
        assert_eq!(error.detail(), INTERNAL_DETAIL);
    }

    #[tokio::test]
    async fn test_panicked_blocking_task_is_internal_error() {
        let result = crate::state::blocking(|| -> Result<(), StoreError> {
            panic!("worker died");
        })
        .await;
        let error = result.unwrap_err();
        assert!(matches!(error, ApiError::Blocking(_)));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.detail(), INTERNAL_DETAIL);
    }

    #[test]
    fn test_unauthorized_carries_challenge_header() {
        let response = ApiError::Auth(AuthError::InvalidToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );

        let response = ApiError::Auth(AuthError::Throttled {
            retry_after_secs: 42,
        })
        .into_response();
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
