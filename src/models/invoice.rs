use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Iterable;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Payment state of an invoice.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InvoiceState {
    #[sea_orm(string_value = "unpaid")]
    Unpaid,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "pending")]
    Pending,
}

impl InvoiceState {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Payment confirmation wins over everything else, so `Paid` is reachable
    /// from any state. Nothing ever returns to `Unpaid`. Re-applying the
    /// current state is accepted as a no-op.
    pub fn can_transition_to(self, next: InvoiceState) -> bool {
        if self == next {
            return true;
        }
        match next {
            InvoiceState::Unpaid => false,
            InvoiceState::Paid => true,
            InvoiceState::Failed | InvoiceState::Pending => {
                matches!(self, InvoiceState::Unpaid | InvoiceState::Pending)
            }
        }
    }

    /// States from which `next` may be entered, including `next` itself.
    pub fn predecessors(next: InvoiceState) -> Vec<InvoiceState> {
        InvoiceState::iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

/// The `invoices` table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    /// Internal identifier, embedded in the provider callback URL.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Address of the client that requested creation.
    pub ip_address: String,
    pub called_at: DateTime<Utc>,
    /// Unpaid invoices are superseded once this passes.
    pub expire_at: Option<DateTime<Utc>>,
    /// Caller-supplied business key.
    pub invoice_number: String,
    /// Provider-issued identifier.
    pub invoice_id: String,
    pub state: InvoiceState,
    /// Settlement id reported by the provider, if a poll discovered one.
    pub payment_id: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub request: Json,
    /// Raw provider response, replayed verbatim on duplicate create calls.
    #[sea_orm(column_type = "Json")]
    pub response: Json,
    #[sea_orm(column_type = "Text", nullable)]
    pub callback_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// True when `expire_at` is set and is at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|deadline| deadline <= now)
    }

    /// Caller webhook, ignoring blank values.
    pub fn caller_callback_url(&self) -> Option<&str> {
        self.callback_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
