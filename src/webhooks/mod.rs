/// Outbound notifications to the systems that requested invoices
pub mod caller_notifier;

pub use caller_notifier::{CallerNotifier, HttpCallerNotifier};
