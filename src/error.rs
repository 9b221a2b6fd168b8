use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Request-level failure taxonomy. The `Display` string of every variant is
/// the stable, user-visible message; internal detail (gateway bodies, mongo
/// errors) is logged when the response is built and never leaks into it.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed request fields. No state change.
    #[error("{0}")]
    Validation(String),

    /// Uniform credential failure, same message whether the username or the
    /// password was wrong.
    #[error("Invalid credentials.")]
    AuthFailure,

    #[error("{0} not found.")]
    NotFound(&'static str),

    /// Duplicate username, or a proposal that already left PENDING.
    #[error("{0}")]
    Conflict(String),

    /// Payment gateway, embedding, or arbiter capability failed.
    #[error("{service} request failed.")]
    External {
        service: &'static str,
        detail: String,
    },

    #[error("Server error.")]
    Database(#[from] mongodb::error::Error),

    #[error("Server error.")]
    Internal(String),
}

impl ApiError {
    pub fn external(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::External {
            service,
            detail: err.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AuthFailure => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::External { .. } => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            Self::External { service, detail } => {
                error!(service, %detail, "external capability failure");
            }
            Self::Database(err) => error!(%err, "database failure"),
            Self::Internal(detail) => error!(%detail, "internal failure"),
            _ => {}
        }
        HttpResponse::build(self.status_code()).json(json!({ "message": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        assert_eq!(
            ApiError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::AuthFailure.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound("User").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Conflict("Username exists.".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::external("arbiter", "boom").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn external_detail_stays_out_of_the_message() {
        let err = ApiError::external("payment gateway", "sk_live_... leaked body");
        assert_eq!(err.to_string(), "payment gateway request failed.");
    }

    #[test]
    fn auth_failure_message_is_uniform() {
        assert_eq!(ApiError::AuthFailure.to_string(), "Invalid credentials.");
    }
}
