use crate::{
    errors::ServiceError,
    models::invoice::{self, InvoiceState},
    services::invoice_store::{InvoiceStore, StateUpdate},
    webhooks::CallerNotifier,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Handles the provider's asynchronous "payment succeeded" notification.
pub struct PaymentCallbackService {
    store: InvoiceStore,
    notifier: Arc<dyn CallerNotifier>,
}

impl PaymentCallbackService {
    pub fn new(store: InvoiceStore, notifier: Arc<dyn CallerNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Marks the invoice with internal id `raw_id` as paid and schedules the
    /// caller notification. The provider's word is trusted as-is.
    #[instrument(skip(self))]
    pub async fn handle_payment_callback(
        &self,
        raw_id: &str,
    ) -> Result<invoice::Model, ServiceError> {
        let id = Uuid::parse_str(raw_id.trim())
            .map_err(|_| ServiceError::ValidationError(format!("invalid callback id: {}", raw_id)))?;

        let invoice = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("invoice {}", id)))?;

        let updated = self
            .store
            .update_state(&invoice, InvoiceState::Paid, StateUpdate::default())
            .await?;
        info!(
            invoice_id = %updated.invoice_id,
            previous = %invoice.state,
            "Payment callback recorded"
        );

        if let Some(url) = updated.caller_callback_url() {
            self.notifier.notify(url.to_string());
        }

        Ok(updated)
    }
}
