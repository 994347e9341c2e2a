use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Datelike, Utc};

use stockroom_core::{LineItemId, ProductId, SaleId};
use stockroom_products::{NewProduct, Product};
use stockroom_sales::{LineItem, LineItemDraft, SaleDocument, SaleKind, SaleStatus};

use super::r#trait::{NewSale, SaleStore, SaleTx, StoreError};

#[derive(Debug, Clone, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    sales: HashMap<SaleId, SaleDocument>,
    /// Insertion order preserved; line items are immutable after creation.
    line_items: Vec<LineItem>,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Transactions run against a cloned snapshot of the
/// tables and replace them wholesale on commit; an error from the body drops
/// the snapshot, so no partial writes are ever observable.
///
/// The table write lock is held for the duration of a transaction, which
/// serializes transactions completely. That is the isolation choice this
/// backend makes to keep the stock check-then-decrement safe from
/// interleaving.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct InMemoryTx {
    working: Tables,
}

impl SaleStore for InMemoryStore {
    fn with_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn SaleTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| E::from(StoreError::Backend("lock poisoned".to_string())))?;

        let mut tx = InMemoryTx {
            working: tables.clone(),
        };

        match body(&mut tx) {
            Ok(value) => {
                *tables = tx.working;
                Ok(value)
            }
            // Snapshot dropped: full rollback.
            Err(err) => Err(err),
        }
    }

    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(tables.products.get(&id).cloned())
    }

    fn get_sale(&self, id: SaleId) -> Result<Option<SaleDocument>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(tables.sales.get(&id).cloned())
    }

    fn line_items_for_sale(&self, sale_id: SaleId) -> Result<Vec<LineItem>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(tables
            .line_items
            .iter()
            .filter(|item| item.sale_id == sale_id)
            .cloned()
            .collect())
    }
}

impl SaleTx for InMemoryTx {
    fn get_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    fn insert_product(
        &mut self,
        product: NewProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        if self
            .working
            .products
            .values()
            .any(|p| p.sku() == product.sku)
        {
            return Err(StoreError::Conflict(format!(
                "sku '{}' already exists",
                product.sku
            )));
        }

        let record = product
            .into_product(ProductId::new(), now)
            .map_err(|e| StoreError::Constraint(e.to_string()))?;
        self.working.products.insert(record.id(), record.clone());
        Ok(record)
    }

    fn delete_product(&mut self, id: ProductId) -> Result<bool, StoreError> {
        Ok(self.working.products.remove(&id).is_some())
    }

    fn update_product_stock(
        &mut self,
        id: ProductId,
        stock: i64,
        now: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        let current = self
            .working
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;

        let updated = current
            .with_stock(stock, now)
            .map_err(|e| StoreError::Constraint(e.to_string()))?;
        self.working.products.insert(id, updated.clone());
        Ok(updated)
    }

    fn get_sale(&mut self, id: SaleId) -> Result<Option<SaleDocument>, StoreError> {
        Ok(self.working.sales.get(&id).cloned())
    }

    fn insert_sale(
        &mut self,
        sale: NewSale,
        now: DateTime<Utc>,
    ) -> Result<SaleDocument, StoreError> {
        // Uniqueness constraint on document numbers.
        if self
            .working
            .sales
            .values()
            .any(|s| s.number() == sale.number)
        {
            return Err(StoreError::Conflict(format!(
                "document number '{}' already exists",
                sale.number
            )));
        }

        let record = SaleDocument::from_parts(
            SaleId::new(),
            sale.number,
            sale.kind,
            sale.customer_name,
            sale.total,
            sale.status,
            false,
            None,
            now,
            now,
        );
        self.working.sales.insert(record.id(), record.clone());
        Ok(record)
    }

    fn insert_line_item(
        &mut self,
        sale_id: SaleId,
        item: &LineItemDraft,
    ) -> Result<LineItem, StoreError> {
        if !self.working.sales.contains_key(&sale_id) {
            return Err(StoreError::NotFound(format!("sale {sale_id}")));
        }

        let record = LineItem {
            id: LineItemId::new(),
            sale_id,
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal: item.subtotal,
        };
        self.working.line_items.push(record.clone());
        Ok(record)
    }

    fn line_items_for_sale(&mut self, sale_id: SaleId) -> Result<Vec<LineItem>, StoreError> {
        Ok(self
            .working
            .line_items
            .iter()
            .filter(|item| item.sale_id == sale_id)
            .cloned()
            .collect())
    }

    fn set_sale_status(
        &mut self,
        id: SaleId,
        status: SaleStatus,
        now: DateTime<Utc>,
    ) -> Result<SaleDocument, StoreError> {
        let current = self
            .working
            .sales
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("sale {id}")))?;

        // Transition validity is the service's concern; the store just writes.
        let updated = SaleDocument::from_parts(
            current.id(),
            current.number().to_string(),
            current.kind(),
            current.customer_name().to_string(),
            current.total(),
            status,
            current.is_returned(),
            current.returned_at(),
            current.created_at(),
            now,
        );
        self.working.sales.insert(id, updated.clone());
        Ok(updated)
    }

    fn set_sale_returned(
        &mut self,
        id: SaleId,
        now: DateTime<Utc>,
    ) -> Result<SaleDocument, StoreError> {
        let current = self
            .working
            .sales
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("sale {id}")))?;

        let updated = current.as_returned(now);
        self.working.sales.insert(id, updated.clone());
        Ok(updated)
    }

    fn count_sales_in_year(&mut self, kind: SaleKind, year: i32) -> Result<u64, StoreError> {
        Ok(self
            .working
            .sales
            .values()
            .filter(|s| s.kind() == kind && s.created_at().year() == year)
            .count() as u64)
    }
}
