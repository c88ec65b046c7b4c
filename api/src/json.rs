use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
};

use crate::error::AppError;

/// Wraps `axum::Json` so a malformed request body surfaces as our own
/// `AppError::Validation` response shape instead of axum's default
/// plaintext rejection body.
pub struct Json<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Json<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(value) => Ok(Self(value.0)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}
