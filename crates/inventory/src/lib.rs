//! `stockroom-inventory` — the inventory transaction manager.
//!
//! Given a sale (order or invoice) composed of line items referencing
//! products and quantities, atomically verify sufficient stock for every
//! line item and decrement it; on return, atomically re-increment stock.

pub mod service;

pub use service::{
    ConfirmMode, InventoryConfig, InventoryError, InventoryResult, InventoryService,
};
