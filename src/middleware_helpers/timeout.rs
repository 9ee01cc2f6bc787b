use crate::errors::ServiceError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tracing::warn;

/// Bounds every request by `limit`.
///
/// On expiry the inner future is dropped, which abandons any provider or
/// database call still in flight, and a 504 error body is returned.
pub async fn request_timeout_middleware(
    State(limit): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(%method, %uri, ?limit, "Request deadline elapsed");
            ServiceError::Timeout(limit).into_response()
        }
    }
}
