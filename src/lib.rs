//! Invoice Gateway Library
//!
//! Idempotent invoice creation against a payment provider, provider payment
//! callbacks and payment status polling.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod telemetry;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::{
    config::AppConfig,
    middleware_helpers::{request_id_middleware, request_timeout_middleware, ApiKeyGuard},
    services::{
        invoices::LifecycleSettings, InvoiceService, InvoiceStore, PaymentCallbackService,
        PaymentProvider,
    },
    webhooks::CallerNotifier,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub invoices: Arc<InvoiceService>,
    pub callbacks: Arc<PaymentCallbackService>,
}

impl AppState {
    /// Wires the invoice services around one shared pool, provider client and notifier.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn CallerNotifier>,
    ) -> Self {
        let invoices = Arc::new(InvoiceService::new(
            db.clone(),
            provider,
            LifecycleSettings::from(&config),
        ));
        let callbacks = Arc::new(PaymentCallbackService::new(
            InvoiceStore::new(db.clone()),
            notifier,
        ));

        Self {
            db,
            config: Arc::new(config),
            invoices,
            callbacks,
        }
    }
}

/// Routes served under `/api/v1`.
pub fn api_v1_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(handlers::invoice_routes(ApiKeyGuard::new(
            state.config.api_key(),
        )))
}

/// Full application router with the shared middleware stack.
///
/// Layers run outermost first: request id, request deadline, HTTP trace, CORS.
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();

    Router::new()
        .nest("/api/v1", api_v1_routes(&state))
        .merge(openapi::swagger_ui())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(middleware::from_fn_with_state(
                    request_timeout,
                    request_timeout_middleware,
                ))
                .layer(telemetry::configure_http_tracing())
                .layer(CorsLayer::permissive()),
        )
}

/// Service identity and version
#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses((status = 200, description = "Service status")),
    tag = "Health"
)]
pub async fn api_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Database connectivity check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service healthy"),
        (status = 503, description = "Database unreachable")
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let db_healthy = db::check_connection(&state.db).await.is_ok();
    let db_status = if db_healthy { "healthy" } else { "unhealthy" };

    let body = Json(json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }));

    if db_healthy {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}
