pub mod invoices;

use crate::middleware_helpers::{api_key_middleware, ApiKeyGuard};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Invoice routes. Create and status check sit behind the API key; the
/// provider callback never does.
pub fn invoice_routes(api_key: ApiKeyGuard) -> Router<AppState> {
    let gated = Router::new()
        .route("/invoices", post(invoices::create_invoice))
        .route("/invoices/:invoice_id", get(invoices::check_invoice))
        .route_layer(middleware::from_fn_with_state(api_key, api_key_middleware));

    Router::new()
        .route(
            "/invoices/callback/:id",
            get(invoices::payment_callback),
        )
        .merge(gated)
}
