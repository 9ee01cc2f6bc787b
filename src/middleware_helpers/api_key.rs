use crate::errors::ServiceError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Expected API key; `None` lets every request through.
#[derive(Clone, Default)]
pub struct ApiKeyGuard {
    expected: Option<Arc<str>>,
}

impl ApiKeyGuard {
    pub fn new(expected: Option<&str>) -> Self {
        Self {
            expected: expected.map(Arc::from),
        }
    }

    fn allows(&self, presented: Option<&str>) -> bool {
        match (&self.expected, presented) {
            (None, _) => true,
            (Some(expected), Some(presented)) => expected.as_ref() == presented,
            (Some(_), None) => false,
        }
    }
}

/// Rejects requests whose `X-API-KEY` does not match the configured key.
pub async fn api_key_middleware(
    State(guard): State<ApiKeyGuard>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !guard.allows(presented) {
        warn!(uri = %request.uri(), "Rejected request with missing or invalid API key");
        return ServiceError::Unauthorized("missing or invalid API key".to_string())
            .into_response();
    }

    next.run(request).await
}
