use crate::{
    errors::{ErrorResponse, ServiceError},
    services::invoices::{CreateInvoiceRequest, PaymentStatus},
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Json, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use tracing::{error, warn};
use utoipa::ToSchema;

/// Body returned by the status check.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"message": "Success", "data": {"isPaid": true, "paymentID": "593285731"}}))]
pub struct InvoiceStatusResponse {
    #[schema(example = "Success")]
    pub message: String,
    pub data: PaymentStatus,
}

/// Which public operation an error came from; decides how it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Create,
    Read,
}

/// A `ServiceError` reported the way a specific endpoint promises.
///
/// Create failures become `400 create_error` and read failures `400
/// read_error`, except for infrastructure failures, timeouts and auth
/// rejections, which keep their own status.
#[derive(Debug)]
pub struct EndpointError {
    endpoint: Endpoint,
    error: ServiceError,
}

impl EndpointError {
    pub fn create(error: ServiceError) -> Self {
        Self {
            endpoint: Endpoint::Create,
            error,
        }
    }

    pub fn read(error: ServiceError) -> Self {
        Self {
            endpoint: Endpoint::Read,
            error,
        }
    }

    fn endpoint_code(&self) -> &'static str {
        match self.endpoint {
            Endpoint::Create => "create_error",
            Endpoint::Read => "read_error",
        }
    }
}

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        match &self.error {
            ServiceError::Timeout(_) | ServiceError::Unauthorized(_) => {
                self.error.into_response()
            }
            err if err.is_internal() => {
                error!(error = %err, "Invoice request failed");
                self.error.into_response()
            }
            err => {
                warn!(error = %err, code = err.code(), "Invoice request rejected");
                let body = ErrorResponse::new(
                    StatusCode::BAD_REQUEST,
                    self.endpoint_code(),
                    err.response_message(),
                );
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}

fn invalid_body(rejection: JsonRejection) -> Response {
    warn!(error = %rejection.body_text(), "Rejected invoice request body");
    let body = ErrorResponse::new(
        StatusCode::BAD_REQUEST,
        "invalid_body",
        rejection.body_text(),
    );
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Best-effort client address: forwarding headers first, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Create an invoice, or return the live one for the same invoice number
#[utoipa::path(
    post,
    path = "/api/v1/invoices",
    request_body = CreateInvoiceRequest,
    responses(
        (status = 200, description = "Provider invoice payload as JSON, newly created or previously stored",
            headers(
                ("X-Request-Id" = String, description = "Unique request identifier"),
            )
        ),
        (status = 400, description = "Invalid body or creation failure", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = crate::errors::ErrorResponse),
        (status = 500, description = "Persistence failure", body = crate::errors::ErrorResponse),
        (status = 504, description = "Request deadline elapsed", body = crate::errors::ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "Invoices"
)]
pub async fn create_invoice(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<CreateInvoiceRequest>, JsonRejection>,
) -> Result<Json<Value>, Response> {
    let Json(request) = payload.map_err(invalid_body)?;
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));

    let outcome = state
        .invoices
        .create_or_reuse(request, &ip)
        .await
        .map_err(|e| EndpointError::create(e).into_response())?;

    Ok(Json(outcome.into_payload()))
}

/// Check whether an invoice has been paid
#[utoipa::path(
    get,
    path = "/api/v1/invoices/{invoice_id}",
    params(
        ("invoice_id" = String, Path, description = "Provider-issued invoice identifier")
    ),
    responses(
        (status = 200, description = "Payment status", body = InvoiceStatusResponse),
        (status = 400, description = "Unknown invoice or provider failure", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = crate::errors::ErrorResponse),
        (status = 504, description = "Request deadline elapsed", body = crate::errors::ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "Invoices"
)]
pub async fn check_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Result<Json<InvoiceStatusResponse>, EndpointError> {
    let status = state
        .invoices
        .check_status(&invoice_id)
        .await
        .map_err(EndpointError::read)?;

    Ok(Json(InvoiceStatusResponse {
        message: "Success".to_string(),
        data: status,
    }))
}

/// Provider payment notification
#[utoipa::path(
    get,
    path = "/api/v1/invoices/callback/{id}",
    params(
        ("id" = String, Path, description = "Internal invoice identifier embedded in the callback URL")
    ),
    responses(
        (status = 200, description = "Payment recorded", body = String, example = json!("SUCCESS")),
        (status = 400, description = "Malformed identifier", body = crate::errors::ErrorResponse),
        (status = 404, description = "Invoice not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Persistence failure", body = crate::errors::ErrorResponse)
    ),
    tag = "Invoices"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<&'static str, ServiceError> {
    state.callbacks.handle_payment_callback(&id).await?;
    Ok("SUCCESS")
}
