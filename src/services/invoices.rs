use crate::{
    config::AppConfig,
    errors::ServiceError,
    models::invoice::{self, InvoiceState},
    services::{
        invoice_store::{InvoiceStore, NewInvoice, StateUpdate},
        provider::{PaymentProvider, ProviderInvoiceRequest},
    },
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Path under the public URL at which the provider reports payments.
pub const CALLBACK_PATH: &str = "/api/v1/invoices/callback";

const MAX_IP_LEN: usize = 45;

/// Body of `POST /invoices`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateInvoiceRequest {
    /// Amount to collect; must be positive
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 1000)]
    #[validate(custom = "validate_amount")]
    pub amount: Decimal,

    /// Caller's business key, used for idempotent retries
    #[serde(rename = "invoiceNumber")]
    #[schema(example = "INV-1")]
    #[validate(length(min = 1, max = 255))]
    pub invoice_number: String,

    #[serde(rename = "invoiceReceiverCode")]
    #[schema(example = "terminal")]
    #[validate(length(min = 1, max = 255))]
    pub invoice_receiver_code: String,

    /// Called with `GET` once the provider confirms payment; may be empty
    #[serde(rename = "callbackURL", default)]
    #[schema(example = "https://shop.example.com/orders/42/paid")]
    #[validate(custom = "validate_callback_url")]
    pub callback_url: String,
}

impl CreateInvoiceRequest {
    /// Trims surrounding whitespace from every text field.
    pub fn normalized(mut self) -> Self {
        self.invoice_number = self.invoice_number.trim().to_string();
        self.invoice_receiver_code = self.invoice_receiver_code.trim().to_string();
        self.callback_url = self.callback_url.trim().to_string();
        self
    }
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        let mut err = ValidationError::new("amount");
        err.message = Some("amount must be greater than zero".into());
        Err(err)
    }
}

fn validate_callback_url(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => {
            let mut err = ValidationError::new("callback_url");
            err.message = Some("callbackURL must be an absolute http(s) URL".into());
            Err(err)
        }
    }
}

/// Result of a create call.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// A new provider invoice was created; carries its raw response.
    Created(Value),
    /// A live invoice already existed; carries its stored response.
    Existing(Value),
}

impl CreateOutcome {
    pub fn into_payload(self) -> Value {
        match self {
            CreateOutcome::Created(v) | CreateOutcome::Existing(v) => v,
        }
    }
}

/// Result of a status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentStatus {
    #[serde(rename = "isPaid")]
    pub is_paid: bool,
    #[serde(rename = "paymentID", skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
}

impl PaymentStatus {
    fn from_model(model: &invoice::Model) -> Self {
        Self {
            is_paid: model.state == InvoiceState::Paid,
            payment_id: model.payment_id.clone(),
        }
    }

    fn unpaid() -> Self {
        Self {
            is_paid: false,
            payment_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub public_url: String,
    pub expire_after: Duration,
    pub fail_expired_on_check: bool,
}

impl From<&AppConfig> for LifecycleSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            public_url: cfg.public_url.clone(),
            expire_after: cfg.invoice.expire_after(),
            fail_expired_on_check: cfg.invoice.fail_expired_on_check,
        }
    }
}

/// Invoice lifecycle: idempotent creation, supersession of stale invoices and
/// payment polling.
pub struct InvoiceService {
    store: InvoiceStore,
    provider: Arc<dyn PaymentProvider>,
    settings: LifecycleSettings,
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InvoiceService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: Arc<dyn PaymentProvider>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store: InvoiceStore::new(db),
            provider,
            settings,
            creation_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &InvoiceStore {
        &self.store
    }

    /// Callback URL handed to the provider for invoice `id`.
    pub fn callback_url_for(&self, id: Uuid) -> String {
        format!(
            "{}{}/{}",
            self.settings.public_url.trim_end_matches('/'),
            CALLBACK_PATH,
            id
        )
    }

    /// Returns the live invoice for `request.invoice_number`, creating one at
    /// the provider when none exists or the existing one went stale unpaid.
    #[instrument(skip(self, request), fields(invoice_number = %request.invoice_number))]
    pub async fn create_or_reuse(
        &self,
        request: CreateInvoiceRequest,
        ip_address: &str,
    ) -> Result<CreateOutcome, ServiceError> {
        let request = request.normalized();
        request.validate()?;

        // Locals drop in reverse order: the mutex guard, then our handle, then
        // the release, so the entry is removed even if this future is cancelled.
        let _release = CreationLockRelease {
            locks: &self.creation_locks,
            key: request.invoice_number.clone(),
        };
        let lock = self.creation_lock(&request.invoice_number);
        let _guard = lock.lock().await;

        self.create_or_reuse_locked(&request, ip_address).await
    }

    fn creation_lock(&self, invoice_number: &str) -> Arc<Mutex<()>> {
        self.creation_locks
            .entry(invoice_number.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn create_or_reuse_locked(
        &self,
        request: &CreateInvoiceRequest,
        ip_address: &str,
    ) -> Result<CreateOutcome, ServiceError> {
        let now = Utc::now();

        if let Some(existing) = self.store.find_by_number(&request.invoice_number).await? {
            // A paid invoice is never replaced, even once its window has passed.
            if !existing.is_expired(now) || existing.state == InvoiceState::Paid {
                info!(invoice_id = %existing.invoice_id, "Returning existing invoice");
                return Ok(CreateOutcome::Existing(existing.response));
            }

            info!(
                invoice_id = %existing.invoice_id,
                state = %existing.state,
                "Superseding expired invoice"
            );
            self.store.soft_delete(&existing).await?;
        }

        match self.create_fresh(request, ip_address, now).await {
            Ok(created) => Ok(CreateOutcome::Created(created.response)),
            Err(ServiceError::Conflict(detail)) => {
                warn!(%detail, "Concurrent creation detected, re-reading winner");
                match self.store.find_by_number(&request.invoice_number).await? {
                    Some(winner) => Ok(CreateOutcome::Existing(winner.response)),
                    None => Err(ServiceError::Conflict(detail)),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn create_fresh(
        &self,
        request: &CreateInvoiceRequest,
        ip_address: &str,
        now: DateTime<Utc>,
    ) -> Result<invoice::Model, ServiceError> {
        let expire_after = chrono::Duration::from_std(self.settings.expire_after)
            .map_err(|e| ServiceError::InternalError(format!("invoice expiry: {}", e)))?;
        let expire_at = now + expire_after;
        let id = Uuid::new_v4();

        let created = self
            .provider
            .create_invoice(&ProviderInvoiceRequest {
                amount: request.amount,
                invoice_number: request.invoice_number.clone(),
                receiver_code: request.invoice_receiver_code.clone(),
                callback_url: self.callback_url_for(id),
                expire_at,
            })
            .await?;

        let callback_url = Some(request.callback_url.clone()).filter(|url| !url.is_empty());

        self.store
            .insert(NewInvoice {
                id,
                ip_address: truncate_ip(ip_address),
                called_at: now,
                expire_at: Some(expire_at),
                invoice_number: request.invoice_number.clone(),
                invoice_id: created.invoice_id,
                request: created.request,
                response: created.response,
                callback_url,
            })
            .await
    }

    /// Reports whether the invoice with provider id `invoice_id` is paid,
    /// asking the provider only while it is not yet known to be paid.
    #[instrument(skip(self))]
    pub async fn check_status(&self, invoice_id: &str) -> Result<PaymentStatus, ServiceError> {
        let invoice = self
            .store
            .find_by_provider_id(invoice_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("invoice {}", invoice_id)))?;

        if invoice.state == InvoiceState::Paid {
            return Ok(PaymentStatus::from_model(&invoice));
        }

        let check = self.provider.check_payment(&invoice.invoice_id).await?;

        if check.is_paid {
            info!(payment_id = %check.payment_id, "Provider reports invoice paid");
            let updated = self
                .store
                .update_state(
                    &invoice,
                    InvoiceState::Paid,
                    StateUpdate {
                        payment_id: Some(check.payment_id),
                    },
                )
                .await?;
            return Ok(PaymentStatus::from_model(&updated));
        }

        if self.settings.fail_expired_on_check
            && invoice.state != InvoiceState::Failed
            && invoice.is_expired(Utc::now())
        {
            return self.fail_expired(&invoice).await;
        }

        Ok(PaymentStatus::unpaid())
    }

    async fn fail_expired(&self, invoice: &invoice::Model) -> Result<PaymentStatus, ServiceError> {
        match self
            .store
            .update_state(invoice, InvoiceState::Failed, StateUpdate::default())
            .await
        {
            Ok(_) => {
                info!("Expired unpaid invoice marked failed");
                Ok(PaymentStatus::unpaid())
            }
            // Lost the race to a payment confirmation.
            Err(ServiceError::InvalidTransition(_)) => match self.store.find_by_id(invoice.id).await? {
                Some(current) => Ok(PaymentStatus::from_model(&current)),
                None => Ok(PaymentStatus::unpaid()),
            },
            Err(e) => Err(e),
        }
    }
}

/// Drops the per-number lock entry once no other caller holds it.
struct CreationLockRelease<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
}

impl Drop for CreationLockRelease<'_> {
    fn drop(&mut self) {
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn truncate_ip(ip: &str) -> String {
    let trimmed = ip.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed.chars().take(MAX_IP_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(amount: Decimal, callback_url: &str) -> CreateInvoiceRequest {
        CreateInvoiceRequest {
            amount,
            invoice_number: " INV-1 ".into(),
            invoice_receiver_code: "terminal".into(),
            callback_url: callback_url.into(),
        }
    }

    #[test]
    fn accepts_valid_request_after_trimming() {
        let req = request(dec!(1000), "").normalized();
        assert_eq!(req.invoice_number, "INV-1");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(request(dec!(0), "").validate().is_err());
        assert!(request(dec!(-5), "").validate().is_err());
    }

    #[test]
    fn rejects_blank_invoice_number() {
        let mut req = request(dec!(1), "");
        req.invoice_number = "   ".into();
        assert!(req.normalized().validate().is_err());
    }

    #[test]
    fn callback_url_must_be_http() {
        assert!(request(dec!(1), "https://shop.example.com/paid")
            .validate()
            .is_ok());
        assert!(request(dec!(1), "ftp://shop.example.com").validate().is_err());
        assert!(request(dec!(1), "not a url").validate().is_err());
    }

    #[test]
    fn request_uses_wire_field_names() {
        let parsed: CreateInvoiceRequest = serde_json::from_value(serde_json::json!({
            "amount": 1000,
            "invoiceNumber": "INV-1",
            "invoiceReceiverCode": "terminal",
            "callbackURL": "https://shop.example.com/paid",
        }))
        .unwrap();
        assert_eq!(parsed.amount, dec!(1000));
        assert_eq!(parsed.invoice_receiver_code, "terminal");
    }

    #[test]
    fn status_serializes_camel_case_and_omits_missing_payment() {
        let status = PaymentStatus::unpaid();
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"isPaid": false})
        );
    }

    #[test]
    fn ip_addresses_are_bounded() {
        assert_eq!(truncate_ip(""), "unknown");
        assert_eq!(truncate_ip(&"a".repeat(100)).len(), MAX_IP_LEN);
    }

    struct SlowProvider(Duration);

    #[async_trait::async_trait]
    impl PaymentProvider for SlowProvider {
        async fn create_invoice(
            &self,
            _request: &ProviderInvoiceRequest,
        ) -> Result<crate::services::provider::CreatedProviderInvoice, ServiceError> {
            tokio::time::sleep(self.0).await;
            Ok(crate::services::provider::CreatedProviderInvoice {
                invoice_id: "prov-slow".into(),
                request: serde_json::json!({}),
                response: serde_json::json!({"invoice_id": "prov-slow"}),
            })
        }

        async fn check_payment(
            &self,
            _invoice_id: &str,
        ) -> Result<crate::services::provider::PaymentCheck, ServiceError> {
            Ok(Default::default())
        }
    }

    async fn service(delay: Duration) -> InvoiceService {
        let pool = crate::db::establish_connection_with_config(&crate::db::DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        InvoiceService::new(
            Arc::new(pool),
            Arc::new(SlowProvider(delay)),
            LifecycleSettings {
                public_url: "http://gateway.test".into(),
                expire_after: Duration::from_secs(600),
                fail_expired_on_check: false,
            },
        )
    }

    #[tokio::test]
    async fn creation_lock_is_released_after_success() {
        let svc = service(Duration::ZERO).await;
        let outcome = svc
            .create_or_reuse(request(dec!(10), ""), "127.0.0.1")
            .await
            .unwrap();
        assert!(matches!(outcome, CreateOutcome::Created(_)));
        assert!(svc.creation_locks.is_empty());
    }

    #[tokio::test]
    async fn cancelled_creation_releases_its_lock() {
        let svc = service(Duration::from_secs(5)).await;
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            svc.create_or_reuse(request(dec!(10), ""), "127.0.0.1"),
        )
        .await;
        assert!(result.is_err());
        assert!(svc.creation_locks.is_empty());
    }
}
