pub mod invoice;

pub use invoice::{
    ActiveModel as InvoiceActiveModel, Column as InvoiceColumn, Entity as Invoice,
    InvoiceState, Model as InvoiceModel,
};
