// Payment gateway client
pub mod provider;

// Persistence
pub mod invoice_store;

// Invoice lifecycle and provider callbacks
pub mod callbacks;
pub mod invoices;

pub use callbacks::PaymentCallbackService;
pub use invoice_store::InvoiceStore;
pub use invoices::InvoiceService;
pub use provider::{PaymentProvider, QPayClient};
