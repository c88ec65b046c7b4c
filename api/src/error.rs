use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// The single HTTP-facing error type. Worker loops use `eyre::Error`
/// instead, since they run off the request path and want freeform
/// `.wrap_err()` context rather than a typed response.
pub enum AppError {
    Database(diesel::result::Error),
    PoolError(String),
    Validation(String),
    Unauthorized,
    NotFound,
    Unhandled(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status_code, error_response) = match self {
            AppError::Database(e) => {
                tracing::error!(?e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    #[cfg(debug_assertions)]
                    ErrorResponse {
                        code: "DB_ERR".into(),
                        msg: Some(format!("Database error: {e}")),
                    },
                    #[cfg(not(debug_assertions))]
                    ErrorResponse {
                        code: "SVR_ERR".into(),
                        msg: Some("Internal server error".into()),
                    },
                )
            }
            AppError::PoolError(e) => {
                tracing::error!(%e, "connection pool error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse {
                        code: "POOL_ERR".into(),
                        msg: Some("Store temporarily unavailable".into()),
                    },
                )
            }
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    code: "VALIDATION_ERR".into(),
                    msg: Some(msg),
                },
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    code: "AUTH_ERR".into(),
                    msg: Some("invalid token".into()),
                },
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    code: "NOT_FOUND".into(),
                    msg: None,
                },
            ),
            AppError::Unhandled(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    code: "ERR".into(),
                    msg: Some(e),
                },
            ),
        };

        (status_code, Json(error_response)).into_response()
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(e: diesel::result::Error) -> Self {
        AppError::Database(e)
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for AppError {
    fn from(e: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        AppError::PoolError(e.to_string())
    }
}

impl From<&'static str> for AppError {
    fn from(e: &'static str) -> Self {
        AppError::Unhandled(e.into())
    }
}
