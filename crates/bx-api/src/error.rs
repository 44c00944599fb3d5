use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::lifecycle;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("provider error: {0}")]
    Infra(#[from] bx_infra::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<lifecycle::Error> for ApiError {
    fn from(err: lifecycle::Error) -> Self {
        use lifecycle::Error as E;
        match err {
            E::NotFound(what) => {
                tracing::debug!(what, "lookup missed");
                ApiError::NotFound
            }
            E::Validation(msg) => ApiError::BadRequest(msg),
            E::ProviderUnavailable(name) => {
                ApiError::BadRequest(format!("provider not available: {name}"))
            }
            E::Infra(e) => ApiError::Infra(e),
            E::Database(e) => ApiError::Database(e),
            E::Disabled(what) => ApiError::Forbidden(format!("{what} is disabled")),
            E::Forbidden(what) => ApiError::Forbidden(format!("{what} requires an administrator")),
            E::Tombstoned => ApiError::Conflict("resource is being removed".into()),
            other @ (E::Timeout { .. } | E::MissingSecret(_)) => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Infra(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_map_to_statuses() {
        let cases = [
            (lifecycle::Error::NotFound("server"), StatusCode::NOT_FOUND),
            (lifecycle::Error::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (lifecycle::Error::Disabled("removing all servers"), StatusCode::FORBIDDEN),
            (lifecycle::Error::Forbidden("removing all servers"), StatusCode::FORBIDDEN),
            (lifecycle::Error::MissingSecret("root_password"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
