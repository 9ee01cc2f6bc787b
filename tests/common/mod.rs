#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use invoice_gateway::{
    config::AppConfig,
    db,
    errors::ServiceError,
    models::invoice::{self, Entity as Invoice},
    services::{
        provider::{CreatedProviderInvoice, PaymentCheck, PaymentProvider, ProviderInvoiceRequest},
        InvoiceStore,
    },
    webhooks::CallerNotifier,
    AppState,
};
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Provider double that counts calls and hands out sequential invoice ids.
#[derive(Default)]
pub struct FakeProvider {
    create_calls: AtomicUsize,
    check_calls: AtomicUsize,
    fail_create: AtomicBool,
    create_delay_ms: AtomicUsize,
    paid_with: Mutex<Option<String>>,
    callback_urls: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    /// Makes subsequent payment checks report a settlement with `payment_id`.
    pub fn mark_paid(&self, payment_id: &str) {
        *self.paid_with.lock().unwrap() = Some(payment_id.to_string());
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn delay_creates(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn last_callback_url(&self) -> Option<String> {
        self.callback_urls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn create_invoice(
        &self,
        request: &ProviderInvoiceRequest,
    ) -> Result<CreatedProviderInvoice, ServiceError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::ProviderError(
                "gateway returned 503 Service Unavailable: down".into(),
            ));
        }

        self.callback_urls
            .lock()
            .unwrap()
            .push(request.callback_url.clone());

        let invoice_id = format!("prov-{}", n);
        Ok(CreatedProviderInvoice {
            invoice_id: invoice_id.clone(),
            request: json!({
                "sender_invoice_no": request.invoice_number,
                "callback_url": request.callback_url,
            }),
            response: json!({
                "invoice_id": invoice_id,
                "qr_text": format!("qr-{}", n),
                "urls": [],
            }),
        })
    }

    async fn check_payment(&self, _invoice_id: &str) -> Result<PaymentCheck, ServiceError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.paid_with.lock().unwrap().clone() {
            Some(payment_id) => PaymentCheck {
                is_paid: true,
                payment_id,
            },
            None => PaymentCheck::default(),
        })
    }
}

/// Notifier double that records requested URLs instead of calling them.
#[derive(Default)]
pub struct RecordingNotifier {
    urls: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl CallerNotifier for RecordingNotifier {
    fn notify(&self, callback_url: String) {
        self.urls.lock().unwrap().push(callback_url);
    }
}

/// Helper harness for spinning up the application against an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub provider: Arc<FakeProvider>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting `customize` adjust the default test configuration.
    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.public_url = "http://gateway.test".to_string();
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let provider = Arc::new(FakeProvider::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::new(Arc::new(pool), cfg, provider.clone(), notifier.clone());
        let router = invoice_gateway::build_router(state.clone());

        Self {
            router,
            state,
            provider,
            notifier,
        }
    }

    pub fn store(&self) -> &InvoiceStore {
        self.state.invoices.store()
    }

    /// Send a request against the router with optional JSON body and extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn create(&self, body: Value) -> Response {
        self.request(Method::POST, "/api/v1/invoices", Some(body), &[])
            .await
    }

    pub async fn check(&self, invoice_id: &str) -> Response {
        self.request(
            Method::GET,
            &format!("/api/v1/invoices/{}", invoice_id),
            None,
            &[],
        )
        .await
    }

    pub async fn callback(&self, id: &str) -> Response {
        self.request(
            Method::GET,
            &format!("/api/v1/invoices/callback/{}", id),
            None,
            &[],
        )
        .await
    }

    /// Live invoice for `invoice_number`, panicking when there is none.
    pub async fn live_invoice(&self, invoice_number: &str) -> invoice::Model {
        self.store()
            .find_by_number(invoice_number)
            .await
            .expect("store lookup")
            .expect("live invoice")
    }

    /// Moves the live invoice's deadline into the past.
    pub async fn expire_now(&self, invoice_number: &str) {
        Invoice::update_many()
            .col_expr(
                invoice::Column::ExpireAt,
                Expr::value(Utc::now() - chrono::Duration::seconds(1)),
            )
            .filter(invoice::Column::InvoiceNumber.eq(invoice_number))
            .filter(invoice::Column::DeletedAt.is_null())
            .exec(&*self.state.db)
            .await
            .expect("backdate invoice");
    }
}

pub fn create_body(invoice_number: &str) -> Value {
    json!({
        "amount": 1000,
        "invoiceNumber": invoice_number,
        "invoiceReceiverCode": "terminal",
        "callbackURL": "https://shop.example.com/orders/42/paid",
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn response_text(response: Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf8 response")
}
