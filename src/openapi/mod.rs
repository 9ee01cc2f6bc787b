use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Invoice Gateway API",
        version = "0.1.0",
        description = r#"
# Invoice Gateway

Creates payment invoices at the payment provider, records their state, receives the
provider's payment callbacks and answers payment status checks.

## Idempotency

`POST /api/v1/invoices` is keyed by `invoiceNumber`. Repeating the call while the
invoice is live returns the stored provider response without creating another
provider invoice. Once an unpaid invoice expires, the next call supersedes it.

## Authentication

When the service is configured with an API key, the create and status endpoints
require it in the `X-API-KEY` header. The provider callback is never gated.

## Errors

Every error body carries a stable `code` and the request id:

```json
{
  "error": "Bad Request",
  "code": "create_error",
  "message": "Provider error: gateway returned 503 Service Unavailable: ",
  "request_id": "0b8c3e0e-8a43-4d8b-9d0e-6f0f1b1f2c3d",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:1323", description = "Local development")
    ),
    tags(
        (name = "Invoices", description = "Invoice creation, status checks and provider callbacks"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::invoices::create_invoice,
        crate::handlers::invoices::check_invoice,
        crate::handlers::invoices::payment_callback,
        crate::health_check,
        crate::api_status,
    ),
    components(
        schemas(
            crate::services::invoices::CreateInvoiceRequest,
            crate::services::invoices::PaymentStatus,
            crate::handlers::invoices::InvoiceStatusResponse,
            crate::models::invoice::InvoiceState,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-KEY"))),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_documents_invoice_routes() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Invoice Gateway API"));
        assert!(json.contains("/api/v1/invoices/{invoice_id}"));
        assert!(json.contains("/api/v1/invoices/callback/{id}"));
        assert!(json.contains("X-API-KEY"));
    }
}
