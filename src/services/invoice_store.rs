use crate::{
    errors::ServiceError,
    models::invoice::{self, Entity as Invoice, InvoiceState},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Fields required to persist a freshly created invoice.
#[derive(Debug, Clone, Validate)]
pub struct NewInvoice {
    pub id: Uuid,
    #[validate(length(min = 1, max = 45))]
    pub ip_address: String,
    pub called_at: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,
    #[validate(length(min = 1, max = 255))]
    pub invoice_number: String,
    #[validate(length(min = 1, max = 255))]
    pub invoice_id: String,
    pub request: Value,
    pub response: Value,
    pub callback_url: Option<String>,
}

/// Extra columns written alongside a state change.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub payment_id: Option<String>,
}

/// Durable invoice records, keyed by invoice number and provider invoice id.
///
/// Number and provider-id lookups only see live rows; superseded rows stay
/// in the table for audit and remain reachable by internal id.
#[derive(Clone)]
pub struct InvoiceStore {
    db: Arc<DatabaseConnection>,
}

impl InvoiceStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn find_by_number(
        &self,
        invoice_number: &str,
    ) -> Result<Option<invoice::Model>, ServiceError> {
        Invoice::find()
            .filter(invoice::Column::InvoiceNumber.eq(invoice_number))
            .filter(invoice::Column::DeletedAt.is_null())
            .one(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    #[instrument(skip(self))]
    pub async fn find_by_provider_id(
        &self,
        invoice_id: &str,
    ) -> Result<Option<invoice::Model>, ServiceError> {
        Invoice::find()
            .filter(invoice::Column::InvoiceId.eq(invoice_id))
            .filter(invoice::Column::DeletedAt.is_null())
            .one(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<invoice::Model>, ServiceError> {
        Invoice::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    /// Inserts a new unpaid invoice.
    ///
    /// A live row with the same invoice number or provider id yields `Conflict`.
    #[instrument(skip(self, new), fields(invoice_number = %new.invoice_number, invoice_id = %new.invoice_id))]
    pub async fn insert(&self, new: NewInvoice) -> Result<invoice::Model, ServiceError> {
        new.validate()?;

        let now = Utc::now();
        let model = invoice::ActiveModel {
            id: Set(new.id),
            ip_address: Set(new.ip_address),
            called_at: Set(new.called_at),
            expire_at: Set(new.expire_at),
            invoice_number: Set(new.invoice_number),
            invoice_id: Set(new.invoice_id),
            state: Set(InvoiceState::Unpaid),
            payment_id: Set(None),
            request: Set(new.request),
            response: Set(new.response),
            callback_url: Set(new.callback_url),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        };

        let saved = model.insert(&*self.db).await.map_err(|e| {
            let err = ServiceError::from_db(e);
            if matches!(err, ServiceError::Conflict(_)) {
                warn!("Invoice insert hit a uniqueness conflict");
            }
            err
        })?;

        info!(id = %saved.id, "Invoice stored");
        Ok(saved)
    }

    /// Moves `current` to `next` and returns the row as it now reads.
    ///
    /// The write only applies while the stored state still permits the
    /// transition, so a concurrent writer can never be rolled back.
    #[instrument(skip(self, current, extra), fields(id = %current.id, from = %current.state, to = %next))]
    pub async fn update_state(
        &self,
        current: &invoice::Model,
        next: InvoiceState,
        extra: StateUpdate,
    ) -> Result<invoice::Model, ServiceError> {
        let mut update = Invoice::update_many()
            .col_expr(invoice::Column::State, Expr::value(next))
            .col_expr(invoice::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(payment_id) = extra.payment_id.filter(|p| !p.is_empty()) {
            update = update.col_expr(invoice::Column::PaymentId, Expr::value(payment_id));
        }

        let result = update
            .filter(invoice::Column::Id.eq(current.id))
            .filter(invoice::Column::State.is_in(InvoiceState::predecessors(next)))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::from_db)?;

        let reread = self
            .find_by_id(current.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("invoice {}", current.id)))?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidTransition(format!(
                "invoice {} is {} and cannot become {}",
                reread.id, reread.state, next
            )));
        }

        debug!(state = %reread.state, "Invoice state updated");
        Ok(reread)
    }

    /// Marks `current` as superseded. Already-deleted rows are left untouched.
    #[instrument(skip(self, current), fields(id = %current.id, invoice_number = %current.invoice_number))]
    pub async fn soft_delete(&self, current: &invoice::Model) -> Result<(), ServiceError> {
        let now = Utc::now();
        let result = Invoice::update_many()
            .col_expr(invoice::Column::DeletedAt, Expr::value(now))
            .col_expr(invoice::Column::UpdatedAt, Expr::value(now))
            .filter(invoice::Column::Id.eq(current.id))
            .filter(invoice::Column::DeletedAt.is_null())
            .exec(&*self.db)
            .await
            .map_err(ServiceError::from_db)?;

        if result.rows_affected > 0 {
            info!("Invoice soft-deleted");
        }
        Ok(())
    }
}
