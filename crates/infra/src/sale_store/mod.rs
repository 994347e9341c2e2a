//! Transactional data-access boundary.
//!
//! This module defines the storage abstraction the inventory transaction
//! manager runs against, without making any storage assumptions: per-record
//! operations live on [`SaleTx`] and are only reachable inside
//! [`SaleStore::with_transaction`], which guarantees all-or-nothing
//! visibility of the body's writes.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresSaleStore;
pub use r#trait::{NewSale, SaleStore, SaleTx, StoreError};
