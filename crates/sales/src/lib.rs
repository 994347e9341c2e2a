//! `stockroom-sales` — sale documents (orders and invoices) and their line items.

pub mod number;
pub mod sale;

pub use number::DocumentNumber;
pub use sale::{LineItem, LineItemDraft, SaleDocument, SaleDraft, SaleKind, SaleStatus};
pub use stockroom_core::{LineItemId, SaleId};
