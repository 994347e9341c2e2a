use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use stockroom_core::{ProductId, SaleId};
use stockroom_products::{NewProduct, Product};
use stockroom_sales::{LineItem, LineItemDraft, SaleDocument, SaleKind, SaleStatus};

/// Store operation error.
///
/// These are **infrastructure errors** (storage, constraints, connectivity)
/// as opposed to domain errors (validation, business rules). They propagate
/// unchanged through the transaction manager; the transaction that produced
/// them is rolled back by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness guarantee rejected the write (e.g. duplicate document
    /// number under concurrent assignment).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A data constraint rejected the write (e.g. negative stock).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A record the operation requires does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A stored row could not be decoded into a domain record.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Any other backend failure (connectivity, pool, lock poisoning).
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Sale header ready for insertion: number assigned, no identity yet.
///
/// The store generates the `SaleId` during insert and returns the persisted
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSale {
    pub number: String,
    pub kind: SaleKind,
    pub customer_name: String,
    /// Total in smallest currency unit, pre-computed by the caller.
    pub total: u64,
    pub status: SaleStatus,
}

/// Per-record operations available inside one live transaction.
///
/// Every read sees the transaction's own writes; a product read inside a
/// transaction is the consistent snapshot the stock check-then-decrement
/// relies on. Implementations must make concurrent transactions against the
/// same product serialize (lock-based or equivalent) so two sales cannot both
/// pass the same stock check.
pub trait SaleTx {
    fn get_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Insert a catalog product (admin path). Enforces unique `sku`.
    fn insert_product(
        &mut self,
        product: NewProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, StoreError>;

    /// Delete a catalog product. Returns whether it existed.
    fn delete_product(&mut self, id: ProductId) -> Result<bool, StoreError>;

    /// Write a product's stock level, stamping `updated_at`.
    ///
    /// Rejects negative stock with [`StoreError::Constraint`].
    fn update_product_stock(
        &mut self,
        id: ProductId,
        stock: i64,
        now: DateTime<Utc>,
    ) -> Result<Product, StoreError>;

    fn get_sale(&mut self, id: SaleId) -> Result<Option<SaleDocument>, StoreError>;

    /// Insert a sale header, generating its identity.
    ///
    /// Enforces unique document numbers with [`StoreError::Conflict`].
    fn insert_sale(&mut self, sale: NewSale, now: DateTime<Utc>) -> Result<SaleDocument, StoreError>;

    /// Insert one line item tagged with `sale_id`, generating its identity.
    fn insert_line_item(
        &mut self,
        sale_id: SaleId,
        item: &LineItemDraft,
    ) -> Result<LineItem, StoreError>;

    /// All line items of a sale, in insertion order.
    fn line_items_for_sale(&mut self, sale_id: SaleId) -> Result<Vec<LineItem>, StoreError>;

    fn set_sale_status(
        &mut self,
        id: SaleId,
        status: SaleStatus,
        now: DateTime<Utc>,
    ) -> Result<SaleDocument, StoreError>;

    /// Mark a sale returned, recording the return timestamp.
    fn set_sale_returned(
        &mut self,
        id: SaleId,
        now: DateTime<Utc>,
    ) -> Result<SaleDocument, StoreError>;

    /// Number of sale documents of `kind` created in calendar year `year`.
    fn count_sales_in_year(&mut self, kind: SaleKind, year: i32) -> Result<u64, StoreError>;
}

/// Transaction-scoping data-access boundary.
///
/// `with_transaction` runs `body` atomically: if the body (or the commit)
/// fails, none of its writes survive. The error type is the caller's; store
/// failures convert into it via `From<StoreError>` so domain errors and
/// persistence errors travel the same channel out of the transaction.
pub trait SaleStore: Send + Sync {
    fn with_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn SaleTx) -> Result<T, E>,
        E: From<StoreError>;

    /// Read a product outside any transaction (no lock taken).
    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Read a sale header outside any transaction.
    fn get_sale(&self, id: SaleId) -> Result<Option<SaleDocument>, StoreError>;

    /// Read a sale's line items outside any transaction.
    fn line_items_for_sale(&self, sale_id: SaleId) -> Result<Vec<LineItem>, StoreError>;
}

impl<S> SaleStore for Arc<S>
where
    S: SaleStore,
{
    fn with_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn SaleTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        (**self).with_transaction(body)
    }

    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get_product(id)
    }

    fn get_sale(&self, id: SaleId) -> Result<Option<SaleDocument>, StoreError> {
        (**self).get_sale(id)
    }

    fn line_items_for_sale(&self, sale_id: SaleId) -> Result<Vec<LineItem>, StoreError> {
        (**self).line_items_for_sale(sale_id)
    }
}
