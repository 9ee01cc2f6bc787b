use crate::{config::ProviderConfig, errors::ServiceError};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Layout the provider expects for `expiry_date`.
pub const PROVIDER_EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Input for creating an invoice at the provider.
#[derive(Debug, Clone)]
pub struct ProviderInvoiceRequest {
    pub amount: Decimal,
    pub invoice_number: String,
    pub receiver_code: String,
    /// Where the provider should report payment; points back at this service.
    pub callback_url: String,
    pub expire_at: DateTime<Utc>,
}

/// Outcome of a successful provider create call.
#[derive(Debug, Clone)]
pub struct CreatedProviderInvoice {
    pub invoice_id: String,
    /// Payload sent to the provider, kept for audit.
    pub request: Value,
    /// Payload returned by the provider, unmodified.
    pub response: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentCheck {
    pub is_paid: bool,
    /// First settlement id, empty when there is none.
    pub payment_id: String,
}

/// Operations the invoice lifecycle needs from a payment gateway.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_invoice(
        &self,
        request: &ProviderInvoiceRequest,
    ) -> Result<CreatedProviderInvoice, ServiceError>;

    async fn check_payment(&self, invoice_id: &str) -> Result<PaymentCheck, ServiceError>;
}

#[derive(Debug, Clone, Deserialize)]
struct AccessToken {
    access_token: String,
    /// Absolute unix timestamp.
    expires_in: i64,
}

impl AccessToken {
    fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires_in > now.timestamp()
    }
}

#[derive(Debug, Serialize)]
struct CreateInvoicePayload<'a> {
    invoice_code: &'a str,
    sender_invoice_no: &'a str,
    invoice_description: &'a str,
    invoice_receiver_code: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    callback_url: &'a str,
    expiry_date: String,
}

#[derive(Debug, Serialize)]
struct PaymentCheckPayload<'a> {
    object_type: &'a str,
    object_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaymentCheckResponse {
    count: f64,
    #[serde(default)]
    rows: Vec<PaymentRow>,
}

#[derive(Debug, Deserialize)]
struct PaymentRow {
    #[serde(default)]
    payment_id: Option<Value>,
}

impl PaymentCheckResponse {
    fn into_check(self) -> PaymentCheck {
        let payment_id = self
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.payment_id)
            .map(|id| match id {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => String::new(),
            })
            .unwrap_or_default();

        PaymentCheck {
            is_paid: self.count > 0.0,
            payment_id,
        }
    }
}

/// QPay merchant API client.
///
/// Holds one bearer token for the whole process. The token lock is held
/// across the expiry check and the credential exchange, so concurrent callers
/// that find it stale wait for a single refresh.
pub struct QPayClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    invoice_code: String,
    timezone: FixedOffset,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for QPayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QPayClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("invoice_code", &self.invoice_code)
            .finish_non_exhaustive()
    }
}

impl QPayClient {
    /// Builds a client; missing credentials fail here rather than on first use.
    pub fn new(config: &ProviderConfig) -> Result<Self, ServiceError> {
        if config.username.trim().is_empty() || config.password.is_empty() {
            return Err(ServiceError::AuthError(
                "provider username and password must be configured".to_string(),
            ));
        }

        let timezone = FixedOffset::east_opt(config.timezone_offset_secs).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "invalid provider timezone offset: {}",
                config.timezone_offset_secs
            ))
        })?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            invoice_code: config.invoice_code.clone(),
            timezone,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Renders an instant the way the provider expects it.
    pub fn format_expiry(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone)
            .format(PROVIDER_EXPIRY_FORMAT)
            .to_string()
    }

    /// Returns a bearer token, exchanging credentials when none is held or
    /// the held one has expired.
    pub async fn ensure_authenticated(&self) -> Result<String, ServiceError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.is_usable_at(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Exchanging provider credentials for a new access token");
        let response = self
            .http
            .post(self.url("/auth/token"))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| ServiceError::AuthError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            warn!(%status, "Provider token exchange rejected");
            return Err(ServiceError::AuthError(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: AccessToken = response
            .json()
            .await
            .map_err(|e| ServiceError::AuthError(format!("malformed token payload: {}", e)))?;
        if token.access_token.is_empty() {
            return Err(ServiceError::AuthError(
                "token payload has an empty access_token".to_string(),
            ));
        }

        info!(expires_at = token.expires_in, "Provider access token refreshed");
        let bearer = token.access_token.clone();
        *guard = Some(token);
        Ok(bearer)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    /// Maps a non-2xx response to `ProviderError`; a 401 also drops the
    /// cached token so the next call re-authenticates.
    async fn check_status(&self, response: Response) -> Result<Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.forget_token().await;
        }
        let body = error_body(response).await;
        Err(ServiceError::ProviderError(format!(
            "gateway returned {}: {}",
            status, body
        )))
    }
}

async fn error_body(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect()
}

#[async_trait]
impl PaymentProvider for QPayClient {
    #[instrument(skip(self, request), fields(invoice_number = %request.invoice_number))]
    async fn create_invoice(
        &self,
        request: &ProviderInvoiceRequest,
    ) -> Result<CreatedProviderInvoice, ServiceError> {
        let bearer = self.ensure_authenticated().await?;

        let payload = CreateInvoicePayload {
            invoice_code: &self.invoice_code,
            sender_invoice_no: &request.invoice_number,
            invoice_description: &request.invoice_number,
            invoice_receiver_code: &request.receiver_code,
            amount: request.amount,
            callback_url: &request.callback_url,
            expiry_date: self.format_expiry(request.expire_at),
        };
        let request_body = serde_json::to_value(&payload)
            .map_err(|e| ServiceError::InternalError(format!("encode invoice payload: {}", e)))?;

        let response = self
            .http
            .post(self.url("/invoice"))
            .bearer_auth(&bearer)
            .json(&request_body)
            .send()
            .await?;
        let response = self.check_status(response).await?;

        let response_body: Value = response.json().await?;
        let invoice_id = response_body
            .get("invoice_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::MalformedResponse("invoice_id missing from create response".into())
            })?;

        info!(%invoice_id, "Provider invoice created");
        Ok(CreatedProviderInvoice {
            invoice_id,
            request: request_body,
            response: response_body,
        })
    }

    #[instrument(skip(self))]
    async fn check_payment(&self, invoice_id: &str) -> Result<PaymentCheck, ServiceError> {
        let bearer = self.ensure_authenticated().await?;

        let response = self
            .http
            .post(self.url("/payment/check"))
            .bearer_auth(&bearer)
            .json(&PaymentCheckPayload {
                object_type: "INVOICE",
                object_id: invoice_id,
            })
            .send()
            .await?;
        let response = self.check_status(response).await?;

        let parsed: PaymentCheckResponse = response.json().await?;
        let check = parsed.into_check();
        debug!(is_paid = check.is_paid, payment_id = %check.payment_id, "Provider payment check");
        Ok(check)
    }
}
