use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::instrument;

use stockroom_core::{DomainError, ProductId, SaleId};
use stockroom_infra::{NewSale, SaleStore, SaleTx, StoreError};
use stockroom_products::Product;
use stockroom_sales::{
    DocumentNumber, LineItemDraft, SaleDocument, SaleDraft, SaleKind, SaleStatus,
};

/// Result type of the inventory transaction manager.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Public error taxonomy of the inventory transaction manager.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Malformed input, rejected before any transaction opens.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A product lacked enough units; the whole transaction was rolled back.
    #[error("insufficient stock for {product}")]
    InsufficientStock { product: String },

    /// The referenced product does not exist.
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// The referenced sale document does not exist.
    #[error("sale {0} not found")]
    SaleNotFound(SaleId),

    /// Guard against double return; a legitimate business rejection.
    #[error("sale {0} already returned")]
    AlreadyReturned(SaleId),

    /// Lower-layer persistence failure, propagated unchanged. The transaction
    /// that produced it was rolled back by the store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DomainError> for InventoryError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => InventoryError::Validation(msg),
            DomainError::InvariantViolation(msg) => InventoryError::Validation(msg),
            DomainError::InvalidId(msg) => InventoryError::Validation(msg),
        }
    }
}

/// How `confirm_order` applies its stock effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmMode {
    /// All line items checked and decremented in one transaction together
    /// with the status update; any failure rolls everything back.
    #[default]
    Atomic,

    /// Each line item decremented in an independent transaction. A failure on
    /// item N leaves items 1..N-1 decremented and the order pending. Kept for
    /// compatibility with deployments that relied on partial confirmation.
    PerItem,
}

/// Behavior knobs, injected at construction.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub confirm_mode: ConfirmMode,
    /// Attempts at the create transaction when the document number collides
    /// under concurrency before the conflict is surfaced.
    pub number_retries: u32,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            confirm_mode: ConfirmMode::Atomic,
            number_retries: 3,
        }
    }
}

/// Inventory transaction manager.
///
/// The store is injected once at construction; every operation runs its
/// reads and writes inside a store transaction, so a failed operation leaves
/// no partial writes behind (the per-item confirm mode being the documented
/// exception).
#[derive(Debug)]
pub struct InventoryService<S> {
    store: S,
    config: InventoryConfig,
}

impl<S> InventoryService<S>
where
    S: SaleStore,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, InventoryConfig::default())
    }

    pub fn with_config(store: S, config: InventoryConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a sale document together with its line items.
    ///
    /// Validation happens before the transaction opens. Inside one
    /// transaction: the document number is assigned, the header and all line
    /// items are inserted in caller order and, when `reduce_stock` is set,
    /// every referenced product is re-read and decremented. The first item
    /// whose product lacks enough units aborts the whole transaction; no
    /// partial writes survive.
    #[instrument(skip(self, draft, items), fields(kind = ?draft.kind, items = items.len()), err)]
    pub fn create_sale_with_items(
        &self,
        draft: SaleDraft,
        items: Vec<LineItemDraft>,
        reduce_stock: bool,
    ) -> InventoryResult<SaleDocument> {
        draft.validate()?;
        LineItemDraft::validate_items(&items)?;

        let mut attempt = 0;
        loop {
            match self.try_create(&draft, &items, reduce_stock) {
                Err(InventoryError::Store(StoreError::Conflict(msg)))
                    if attempt + 1 < self.config.number_retries =>
                {
                    // Concurrent creation took our number; re-count and retry.
                    attempt += 1;
                    tracing::warn!(attempt, conflict = %msg, "document number conflict, retrying");
                }
                other => return other,
            }
        }
    }

    fn try_create(
        &self,
        draft: &SaleDraft,
        items: &[LineItemDraft],
        reduce_stock: bool,
    ) -> InventoryResult<SaleDocument> {
        let now = Utc::now();

        self.store.with_transaction(|tx| {
            let number = next_number_in_tx(tx, draft.kind, now)?;
            let sale = tx.insert_sale(
                NewSale {
                    number: number.to_string(),
                    kind: draft.kind,
                    customer_name: draft.customer_name.clone(),
                    total: draft.total,
                    status: draft.kind.initial_status(),
                },
                now,
            )?;

            for item in items {
                tx.insert_line_item(sale.id(), item)?;
            }

            if reduce_stock {
                // List order; the consistent snapshot comes from reading each
                // product inside this transaction.
                for item in items {
                    deduct_in_tx(tx, item.product_id, item.quantity, now)?;
                }
            }

            tracing::info!(
                sale_id = %sale.id(),
                number = %sale.number(),
                reduce_stock,
                "sale created"
            );
            Ok(sale)
        })
    }

    /// Reverse a sale's inventory effect.
    ///
    /// Restores stock for every line item whose product still exists
    /// (products deleted since the sale are skipped) and sets the returned
    /// flag. A second call is rejected with `AlreadyReturned`.
    #[instrument(skip(self), fields(sale_id = %sale_id), err)]
    pub fn return_sale(&self, sale_id: SaleId) -> InventoryResult<SaleDocument> {
        let now = Utc::now();

        self.store.with_transaction(|tx| {
            let sale = tx
                .get_sale(sale_id)?
                .ok_or(InventoryError::SaleNotFound(sale_id))?;
            if sale.is_returned() {
                return Err(InventoryError::AlreadyReturned(sale_id));
            }

            let items = tx.line_items_for_sale(sale_id)?;
            for item in &items {
                match tx.get_product(item.product_id)? {
                    Some(product) => {
                        tx.update_product_stock(
                            item.product_id,
                            product.stock() + item.quantity,
                            now,
                        )?;
                    }
                    None => {
                        // Policy: restoration only applies to products that
                        // still exist.
                        tracing::warn!(
                            product_id = %item.product_id,
                            "product deleted since sale, skipping stock restoration"
                        );
                    }
                }
            }

            let updated = tx.set_sale_returned(sale_id, now)?;
            tracing::info!(sale_id = %sale_id, items = items.len(), "sale returned");
            Ok(updated)
        })
    }

    /// Single-product check-and-decrement.
    ///
    /// Returns `Ok(false)` without mutating when stock is insufficient; the
    /// caller translates that into a user-facing message and decides what to
    /// do about any surrounding multi-item operation.
    pub fn reduce_stock(&self, product_id: ProductId, quantity: i64) -> InventoryResult<bool> {
        if quantity <= 0 {
            return Err(InventoryError::Validation(
                "quantity must be positive".to_string(),
            ));
        }
        let now = Utc::now();

        self.store.with_transaction(|tx| {
            let product = tx
                .get_product(product_id)?
                .ok_or(InventoryError::ProductNotFound(product_id))?;
            if !product.has_stock_for(quantity) {
                return Ok(false);
            }
            tx.update_product_stock(product_id, product.stock() - quantity, now)?;
            Ok(true)
        })
    }

    /// The `pending -> confirmed` transition, with its stock effect.
    ///
    /// The stock effect follows [`InventoryConfig::confirm_mode`].
    #[instrument(skip(self), fields(sale_id = %sale_id, mode = ?self.config.confirm_mode), err)]
    pub fn confirm_order(&self, sale_id: SaleId) -> InventoryResult<SaleDocument> {
        match self.config.confirm_mode {
            ConfirmMode::Atomic => self.confirm_order_atomic(sale_id),
            ConfirmMode::PerItem => self.confirm_order_per_item(sale_id),
        }
    }

    fn confirm_order_atomic(&self, sale_id: SaleId) -> InventoryResult<SaleDocument> {
        let now = Utc::now();

        self.store.with_transaction(|tx| {
            let sale = tx
                .get_sale(sale_id)?
                .ok_or(InventoryError::SaleNotFound(sale_id))?;
            ensure_can_transition(&sale, SaleStatus::Confirmed)?;

            let items = tx.line_items_for_sale(sale_id)?;
            for item in &items {
                deduct_in_tx(tx, item.product_id, item.quantity, now)?;
            }

            let updated = tx.set_sale_status(sale_id, SaleStatus::Confirmed, now)?;
            tracing::info!(sale_id = %sale_id, items = items.len(), "order confirmed");
            Ok(updated)
        })
    }

    /// Compatibility path: every item commits independently, so a failure on
    /// item N leaves items 1..N-1 decremented and the order pending.
    fn confirm_order_per_item(&self, sale_id: SaleId) -> InventoryResult<SaleDocument> {
        let sale = self
            .store
            .get_sale(sale_id)?
            .ok_or(InventoryError::SaleNotFound(sale_id))?;
        ensure_can_transition(&sale, SaleStatus::Confirmed)?;

        let items = self.store.line_items_for_sale(sale_id)?;
        for item in &items {
            let product = self
                .store
                .get_product(item.product_id)?
                .ok_or(InventoryError::ProductNotFound(item.product_id))?;
            if !self.reduce_stock(item.product_id, item.quantity)? {
                return Err(InventoryError::InsufficientStock {
                    product: product.name().to_string(),
                });
            }
        }

        let now = Utc::now();
        let updated = self
            .store
            .with_transaction(|tx| tx.set_sale_status(sale_id, SaleStatus::Confirmed, now))?;
        Ok(updated)
    }

    /// The `confirmed -> delivered` transition. No inventory side effect.
    pub fn deliver_order(&self, sale_id: SaleId) -> InventoryResult<SaleDocument> {
        self.transition_without_stock(sale_id, SaleStatus::Delivered)
    }

    /// The `pending -> rejected` transition. No inventory side effect.
    pub fn reject_order(&self, sale_id: SaleId) -> InventoryResult<SaleDocument> {
        self.transition_without_stock(sale_id, SaleStatus::Rejected)
    }

    fn transition_without_stock(
        &self,
        sale_id: SaleId,
        next: SaleStatus,
    ) -> InventoryResult<SaleDocument> {
        let now = Utc::now();

        self.store.with_transaction(|tx| {
            let sale = tx
                .get_sale(sale_id)?
                .ok_or(InventoryError::SaleNotFound(sale_id))?;
            ensure_can_transition(&sale, next)?;
            Ok(tx.set_sale_status(sale_id, next, now)?)
        })
    }

    /// Peek at the number the next document of `kind` would receive.
    ///
    /// The number actually assigned by `create_sale_with_items` is computed
    /// inside the insert transaction, so this is advisory under concurrency.
    pub fn next_document_number(&self, kind: SaleKind) -> InventoryResult<String> {
        let now = Utc::now();
        self.store
            .with_transaction(|tx| next_number_in_tx(tx, kind, now).map(|n| n.to_string()))
    }
}

fn ensure_can_transition(sale: &SaleDocument, next: SaleStatus) -> InventoryResult<()> {
    if sale.status().is_terminal() {
        return Err(InventoryError::Validation(format!(
            "sale {} is {:?} and cannot change status",
            sale.id(),
            sale.status()
        )));
    }
    if !sale.status().can_transition_to(next) {
        return Err(InventoryError::Validation(format!(
            "cannot transition sale from {:?} to {:?}",
            sale.status(),
            next
        )));
    }
    Ok(())
}

/// Check-then-decrement for one product inside an open transaction.
fn deduct_in_tx(
    tx: &mut dyn SaleTx,
    product_id: ProductId,
    quantity: i64,
    now: DateTime<Utc>,
) -> InventoryResult<Product> {
    let product = tx
        .get_product(product_id)?
        .ok_or(InventoryError::ProductNotFound(product_id))?;

    if !product.has_stock_for(quantity) {
        return Err(InventoryError::InsufficientStock {
            product: product.name().to_string(),
        });
    }

    Ok(tx.update_product_stock(product_id, product.stock() - quantity, now)?)
}

/// Year-scoped sequential number, computed inside the open transaction.
fn next_number_in_tx(
    tx: &mut dyn SaleTx,
    kind: SaleKind,
    now: DateTime<Utc>,
) -> InventoryResult<DocumentNumber> {
    let year = now.year();
    let existing = tx.count_sales_in_year(kind, year)?;
    Ok(DocumentNumber::new(
        kind.document_prefix(),
        year,
        existing as u32 + 1,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_infra::InMemoryStore;
    use stockroom_products::NewProduct;

    fn service() -> InventoryService<InMemoryStore> {
        InventoryService::new(InMemoryStore::new())
    }

    fn seed_product(service: &InventoryService<InMemoryStore>, name: &str, stock: i64) -> Product {
        let now = Utc::now();
        service
            .store()
            .with_transaction::<_, StoreError, _>(|tx| {
                tx.insert_product(
                    NewProduct {
                        sku: format!("SKU-{name}"),
                        name: name.to_string(),
                        unit_price: 1000,
                        stock,
                    },
                    now,
                )
            })
            .unwrap()
    }

    fn item(product: &Product, quantity: i64) -> LineItemDraft {
        LineItemDraft {
            product_id: product.id(),
            quantity,
            unit_price: product.unit_price(),
            subtotal: quantity as u64 * product.unit_price(),
        }
    }

    fn order_draft() -> SaleDraft {
        SaleDraft {
            kind: SaleKind::Order,
            customer_name: "Ada Lovelace".to_string(),
            total: 4000,
        }
    }

    #[test]
    fn reduce_stock_decrements_when_available() {
        let service = service();
        let product = seed_product(&service, "Widget", 10);

        assert!(service.reduce_stock(product.id(), 4).unwrap());
        assert_eq!(
            service.store().get_product(product.id()).unwrap().unwrap().stock(),
            6
        );
    }

    #[test]
    fn reduce_stock_refuses_without_mutation() {
        let service = service();
        let product = seed_product(&service, "Widget", 3);

        assert!(!service.reduce_stock(product.id(), 5).unwrap());
        assert_eq!(
            service.store().get_product(product.id()).unwrap().unwrap().stock(),
            3
        );
    }

    #[test]
    fn reduce_stock_rejects_non_positive_quantity() {
        let service = service();
        let product = seed_product(&service, "Widget", 3);

        assert!(matches!(
            service.reduce_stock(product.id(), 0),
            Err(InventoryError::Validation(_))
        ));
        assert!(matches!(
            service.reduce_stock(product.id(), -2),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn reduce_stock_unknown_product_is_an_error() {
        let service = service();
        let missing = ProductId::new();

        assert!(matches!(
            service.reduce_stock(missing, 1),
            Err(InventoryError::ProductNotFound(id)) if id == missing
        ));
    }

    #[test]
    fn create_sale_rejects_empty_item_list_before_any_write() {
        let service = service();

        let err = service
            .create_sale_with_items(order_draft(), vec![], true)
            .unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
        assert_eq!(
            service.next_document_number(SaleKind::Order).unwrap(),
            format!("ORD-{}-00001", Utc::now().year())
        );
    }

    #[test]
    fn create_sale_without_reduction_leaves_stock_alone() {
        let service = service();
        let product = seed_product(&service, "Widget", 10);

        let sale = service
            .create_sale_with_items(order_draft(), vec![item(&product, 4)], false)
            .unwrap();

        assert_eq!(sale.status(), SaleStatus::Pending);
        assert_eq!(
            service.store().get_product(product.id()).unwrap().unwrap().stock(),
            10
        );
        assert_eq!(service.store().line_items_for_sale(sale.id()).unwrap().len(), 1);
    }

    #[test]
    fn invoice_is_created_confirmed() {
        let service = service();
        let product = seed_product(&service, "Widget", 10);

        let sale = service
            .create_sale_with_items(
                SaleDraft {
                    kind: SaleKind::Invoice,
                    customer_name: "Walk-in".to_string(),
                    total: 1000,
                },
                vec![item(&product, 1)],
                true,
            )
            .unwrap();

        assert_eq!(sale.status(), SaleStatus::Confirmed);
        assert!(sale.number().starts_with("INV-"));
    }

    #[test]
    fn confirm_order_atomic_rolls_back_on_shortage() {
        let service = service();
        let abundant = seed_product(&service, "Abundant", 100);
        let scarce = seed_product(&service, "Scarce", 1);

        let sale = service
            .create_sale_with_items(
                order_draft(),
                vec![item(&abundant, 5), item(&scarce, 3)],
                false,
            )
            .unwrap();

        let err = service.confirm_order(sale.id()).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock { ref product } if product == "Scarce"
        ));

        // Nothing moved, order still pending.
        assert_eq!(
            service.store().get_product(abundant.id()).unwrap().unwrap().stock(),
            100
        );
        assert_eq!(
            service.store().get_sale(sale.id()).unwrap().unwrap().status(),
            SaleStatus::Pending
        );
    }

    #[test]
    fn confirm_order_per_item_leaves_partial_decrements() {
        let store = InMemoryStore::new();
        let service = InventoryService::with_config(
            store,
            InventoryConfig {
                confirm_mode: ConfirmMode::PerItem,
                ..InventoryConfig::default()
            },
        );
        let abundant = seed_product(&service, "Abundant", 100);
        let scarce = seed_product(&service, "Scarce", 1);

        let sale = service
            .create_sale_with_items(
                order_draft(),
                vec![item(&abundant, 5), item(&scarce, 3)],
                false,
            )
            .unwrap();

        let err = service.confirm_order(sale.id()).unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { .. }));

        // The hazard this mode preserves: the first item's decrement stuck.
        assert_eq!(
            service.store().get_product(abundant.id()).unwrap().unwrap().stock(),
            95
        );
        assert_eq!(
            service.store().get_sale(sale.id()).unwrap().unwrap().status(),
            SaleStatus::Pending
        );
    }

    #[test]
    fn confirm_then_deliver_walks_the_state_machine() {
        let service = service();
        let product = seed_product(&service, "Widget", 10);

        let sale = service
            .create_sale_with_items(order_draft(), vec![item(&product, 2)], false)
            .unwrap();

        let confirmed = service.confirm_order(sale.id()).unwrap();
        assert_eq!(confirmed.status(), SaleStatus::Confirmed);
        assert_eq!(
            service.store().get_product(product.id()).unwrap().unwrap().stock(),
            8
        );

        let delivered = service.deliver_order(sale.id()).unwrap();
        assert_eq!(delivered.status(), SaleStatus::Delivered);

        // Terminal; no further transitions.
        assert!(matches!(
            service.reject_order(sale.id()),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn reject_is_only_reachable_from_pending() {
        let service = service();
        let product = seed_product(&service, "Widget", 10);

        let sale = service
            .create_sale_with_items(order_draft(), vec![item(&product, 2)], false)
            .unwrap();
        let rejected = service.reject_order(sale.id()).unwrap();
        assert_eq!(rejected.status(), SaleStatus::Rejected);

        assert!(matches!(
            service.confirm_order(sale.id()),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn document_numbers_increase_per_kind() {
        let service = service();
        let product = seed_product(&service, "Widget", 100);
        let year = Utc::now().year();

        for expected in 1..=3u32 {
            let sale = service
                .create_sale_with_items(order_draft(), vec![item(&product, 1)], true)
                .unwrap();
            assert_eq!(
                sale.number(),
                format!("ORD-{year}-{expected:05}")
            );
        }

        // Invoice numbering runs independently of orders.
        assert_eq!(
            service.next_document_number(SaleKind::Invoice).unwrap(),
            format!("INV-{year}-00001")
        );
    }
}
