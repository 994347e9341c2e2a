//! Postgres-backed sale store implementation.
//!
//! Persists products, sale headers and line items in PostgreSQL. Stock
//! invariants and document-number uniqueness are enforced at the database
//! level (CHECK and UNIQUE constraints) in addition to the service's own
//! in-transaction checks.
//!
//! ## Isolation
//!
//! Product and sale reads inside a transaction use `SELECT ... FOR UPDATE`,
//! so two concurrent transactions touching the same product serialize on the
//! row lock. That is the explicit isolation choice that keeps the stock
//! check-then-decrement safe from interleaving on this backend.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate document number or sku |
//! | Database (check constraint violation) | `23514` | `Constraint` | Negative stock, non-positive quantity |
//! | Database (foreign key violation) | `23503` | `Constraint` | Line item without its sale |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | RowNotFound | N/A | `NotFound` | Update target missing |
//! | Other | N/A | `Backend` | Network errors, pool failures, etc. |

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use stockroom_core::{LineItemId, ProductId, SaleId};
use stockroom_products::{NewProduct, Product};
use stockroom_sales::{LineItem, LineItemDraft, SaleDocument, SaleKind, SaleStatus};

use super::r#trait::{NewSale, SaleStore, SaleTx, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id UUID PRIMARY KEY,
        sku TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        unit_price BIGINT NOT NULL CHECK (unit_price >= 0),
        stock BIGINT NOT NULL CHECK (stock >= 0),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sales (
        id UUID PRIMARY KEY,
        number TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        customer_name TEXT NOT NULL,
        total BIGINT NOT NULL CHECK (total >= 0),
        status TEXT NOT NULL,
        returned BOOLEAN NOT NULL DEFAULT FALSE,
        returned_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS line_items (
        id UUID PRIMARY KEY,
        sale_id UUID NOT NULL REFERENCES sales(id),
        product_id UUID NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        unit_price BIGINT NOT NULL CHECK (unit_price >= 0),
        subtotal BIGINT NOT NULL CHECK (subtotal >= 0),
        position BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS line_items_sale_id_idx ON line_items (sale_id, position)
    "#,
];

const PRODUCT_COLUMNS: &str = "id, sku, name, unit_price, stock, created_at, updated_at";
const SALE_COLUMNS: &str =
    "id, number, kind, customer_name, total, status, returned, returned_at, created_at, updated_at";
const LINE_ITEM_COLUMNS: &str = "id, sale_id, product_id, quantity, unit_price, subtotal";

/// Postgres-backed transactional sale store.
///
/// Uses the SQLx connection pool (thread-safe, `Send + Sync`). The
/// [`SaleStore`] trait is synchronous, so operations run the async driver via
/// `tokio::runtime::Handle`; callers must be inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresSaleStore {
    pool: Arc<PgPool>,
}

impl PostgresSaleStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn fetch_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;

        row.map(|r| decode_product(&r)).transpose()
    }

    #[instrument(skip(self), fields(sale_id = %id), err)]
    async fn fetch_sale(&self, id: SaleId) -> Result<Option<SaleDocument>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_sale", e))?;

        row.map(|r| decode_sale(&r)).transpose()
    }

    #[instrument(skip(self), fields(sale_id = %sale_id), err)]
    async fn fetch_line_items(&self, sale_id: SaleId) -> Result<Vec<LineItem>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM line_items WHERE sale_id = $1 ORDER BY position ASC"
        ))
        .bind(sale_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("line_items_for_sale", e))?;

        rows.iter().map(decode_line_item).collect()
    }
}

impl SaleStore for PostgresSaleStore {
    fn with_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn SaleTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let handle = runtime_handle().map_err(E::from)?;
        let tx = handle
            .block_on(self.pool.begin())
            .map_err(|e| E::from(map_sqlx_error("begin_transaction", e)))?;

        let mut pg_tx = PostgresTx {
            handle: handle.clone(),
            tx,
            next_position: 0,
        };

        match body(&mut pg_tx) {
            Ok(value) => {
                handle
                    .block_on(pg_tx.tx.commit())
                    .map_err(|e| E::from(map_sqlx_error("commit_transaction", e)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = handle.block_on(pg_tx.tx.rollback()) {
                    tracing::warn!(error = %rollback_err, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        runtime_handle()?.block_on(self.fetch_product(id))
    }

    fn get_sale(&self, id: SaleId) -> Result<Option<SaleDocument>, StoreError> {
        runtime_handle()?.block_on(self.fetch_sale(id))
    }

    fn line_items_for_sale(&self, sale_id: SaleId) -> Result<Vec<LineItem>, StoreError> {
        runtime_handle()?.block_on(self.fetch_line_items(sale_id))
    }
}

struct PostgresTx {
    handle: tokio::runtime::Handle,
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
    /// Insertion order of line items within this transaction.
    next_position: i64,
}

impl SaleTx for PostgresTx {
    fn get_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let tx = &mut self.tx;
        self.handle.block_on(async move {
            let row = sqlx::query(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?;

            row.map(|r| decode_product(&r)).transpose()
        })
    }

    fn insert_product(
        &mut self,
        product: NewProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        let record = product
            .into_product(ProductId::new(), now)
            .map_err(|e| StoreError::Constraint(e.to_string()))?;

        let tx = &mut self.tx;
        self.handle.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO products (id, sku, name, unit_price, stock, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(record.id().as_uuid())
            .bind(record.sku())
            .bind(record.name())
            .bind(record.unit_price() as i64)
            .bind(record.stock())
            .bind(record.created_at())
            .bind(record.updated_at())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_product", e))?;

            Ok(record)
        })
    }

    fn delete_product(&mut self, id: ProductId) -> Result<bool, StoreError> {
        let tx = &mut self.tx;
        self.handle.block_on(async move {
            let result = sqlx::query("DELETE FROM products WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("delete_product", e))?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn update_product_stock(
        &mut self,
        id: ProductId,
        stock: i64,
        now: DateTime<Utc>,
    ) -> Result<Product, StoreError> {
        if stock < 0 {
            return Err(StoreError::Constraint("stock cannot go negative".to_string()));
        }

        let tx = &mut self.tx;
        self.handle.block_on(async move {
            let row = sqlx::query(&format!(
                "UPDATE products SET stock = $2, updated_at = $3 WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(stock)
            .bind(now)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_product_stock", e))?;

            let row = row.ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
            decode_product(&row)
        })
    }

    fn get_sale(&mut self, id: SaleId) -> Result<Option<SaleDocument>, StoreError> {
        let tx = &mut self.tx;
        self.handle.block_on(async move {
            let row = sqlx::query(&format!(
                "SELECT {SALE_COLUMNS} FROM sales WHERE id = $1 FOR UPDATE"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("get_sale", e))?;

            row.map(|r| decode_sale(&r)).transpose()
        })
    }

    fn insert_sale(
        &mut self,
        sale: NewSale,
        now: DateTime<Utc>,
    ) -> Result<SaleDocument, StoreError> {
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

        let tx = &mut self.tx;
        self.handle.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO sales (id, number, kind, customer_name, total, status,
                                   returned, returned_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(record.id().as_uuid())
            .bind(record.number())
            .bind(kind_as_str(record.kind()))
            .bind(record.customer_name())
            .bind(record.total() as i64)
            .bind(status_as_str(record.status()))
            .bind(record.is_returned())
            .bind(record.returned_at())
            .bind(record.created_at())
            .bind(record.updated_at())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_sale", e))?;

            Ok(record)
        })
    }

    fn insert_line_item(
        &mut self,
        sale_id: SaleId,
        item: &LineItemDraft,
    ) -> Result<LineItem, StoreError> {
        let record = LineItem {
            id: LineItemId::new(),
            sale_id,
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal: item.subtotal,
        };
        let position = self.next_position;
        self.next_position += 1;

        let tx = &mut self.tx;
        self.handle.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO line_items (id, sale_id, product_id, quantity, unit_price, subtotal, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(record.id.as_uuid())
            .bind(record.sale_id.as_uuid())
            .bind(record.product_id.as_uuid())
            .bind(record.quantity)
            .bind(record.unit_price as i64)
            .bind(record.subtotal as i64)
            .bind(position)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_line_item", e))?;

            Ok(record)
        })
    }

    fn line_items_for_sale(&mut self, sale_id: SaleId) -> Result<Vec<LineItem>, StoreError> {
        let tx = &mut self.tx;
        self.handle.block_on(async move {
            let rows = sqlx::query(&format!(
                "SELECT {LINE_ITEM_COLUMNS} FROM line_items WHERE sale_id = $1 ORDER BY position ASC"
            ))
            .bind(sale_id.as_uuid())
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("line_items_for_sale", e))?;

            rows.iter().map(decode_line_item).collect()
        })
    }

    fn set_sale_status(
        &mut self,
        id: SaleId,
        status: SaleStatus,
        now: DateTime<Utc>,
    ) -> Result<SaleDocument, StoreError> {
        let tx = &mut self.tx;
        self.handle.block_on(async move {
            let row = sqlx::query(&format!(
                "UPDATE sales SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {SALE_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(status_as_str(status))
            .bind(now)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("set_sale_status", e))?;

            let row = row.ok_or_else(|| StoreError::NotFound(format!("sale {id}")))?;
            decode_sale(&row)
        })
    }

    fn set_sale_returned(
        &mut self,
        id: SaleId,
        now: DateTime<Utc>,
    ) -> Result<SaleDocument, StoreError> {
        let tx = &mut self.tx;
        self.handle.block_on(async move {
            let row = sqlx::query(&format!(
                "UPDATE sales SET returned = TRUE, returned_at = $2, updated_at = $2 \
                 WHERE id = $1 RETURNING {SALE_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(now)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("set_sale_returned", e))?;

            let row = row.ok_or_else(|| StoreError::NotFound(format!("sale {id}")))?;
            decode_sale(&row)
        })
    }

    fn count_sales_in_year(&mut self, kind: SaleKind, year: i32) -> Result<u64, StoreError> {
        let tx = &mut self.tx;
        self.handle.block_on(async move {
            let row = sqlx::query(
                r#"
                SELECT COUNT(*) AS count FROM sales
                WHERE kind = $1
                  AND EXTRACT(YEAR FROM (created_at AT TIME ZONE 'UTC'))::int = $2
                "#,
            )
            .bind(kind_as_str(kind))
            .bind(year)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("count_sales_in_year", e))?;

            let count: i64 = row
                .try_get("count")
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn runtime_handle() -> Result<tokio::runtime::Handle, StoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "PostgresSaleStore requires an async runtime (tokio); call from within a runtime context"
                .to_string(),
        )
    })
}

fn kind_as_str(kind: SaleKind) -> &'static str {
    match kind {
        SaleKind::Order => "order",
        SaleKind::Invoice => "invoice",
    }
}

fn parse_kind(value: &str) -> Result<SaleKind, StoreError> {
    match value {
        "order" => Ok(SaleKind::Order),
        "invoice" => Ok(SaleKind::Invoice),
        other => Err(StoreError::Decode(format!("unknown sale kind '{other}'"))),
    }
}

fn status_as_str(status: SaleStatus) -> &'static str {
    match status {
        SaleStatus::Pending => "pending",
        SaleStatus::Confirmed => "confirmed",
        SaleStatus::Delivered => "delivered",
        SaleStatus::Rejected => "rejected",
    }
}

fn parse_status(value: &str) -> Result<SaleStatus, StoreError> {
    match value {
        "pending" => Ok(SaleStatus::Pending),
        "confirmed" => Ok(SaleStatus::Confirmed),
        "delivered" => Ok(SaleStatus::Delivered),
        "rejected" => Ok(SaleStatus::Rejected),
        other => Err(StoreError::Decode(format!("unknown sale status '{other}'"))),
    }
}

fn decode_product(row: &PgRow) -> Result<Product, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode(e.to_string());

    Ok(Product::from_parts(
        ProductId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        row.try_get("sku").map_err(decode)?,
        row.try_get("name").map_err(decode)?,
        row.try_get::<i64, _>("unit_price").map_err(decode)? as u64,
        row.try_get("stock").map_err(decode)?,
        row.try_get("created_at").map_err(decode)?,
        row.try_get("updated_at").map_err(decode)?,
    ))
}

fn decode_sale(row: &PgRow) -> Result<SaleDocument, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode(e.to_string());

    Ok(SaleDocument::from_parts(
        SaleId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        row.try_get("number").map_err(decode)?,
        parse_kind(row.try_get::<String, _>("kind").map_err(decode)?.as_str())?,
        row.try_get("customer_name").map_err(decode)?,
        row.try_get::<i64, _>("total").map_err(decode)? as u64,
        parse_status(row.try_get::<String, _>("status").map_err(decode)?.as_str())?,
        row.try_get("returned").map_err(decode)?,
        row.try_get("returned_at").map_err(decode)?,
        row.try_get("created_at").map_err(decode)?,
        row.try_get("updated_at").map_err(decode)?,
    ))
}

fn decode_line_item(row: &PgRow) -> Result<LineItem, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode(e.to_string());

    Ok(LineItem {
        id: LineItemId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        sale_id: SaleId::from_uuid(row.try_get::<Uuid, _>("sale_id").map_err(decode)?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id").map_err(decode)?),
        quantity: row.try_get("quantity").map_err(decode)?,
        unit_price: row.try_get::<i64, _>("unit_price").map_err(decode)? as u64,
        subtotal: row.try_get::<i64, _>("subtotal").map_err(decode)? as u64,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    // Unique violation
                    "23505" => StoreError::Conflict(msg),
                    // Check constraint violation
                    "23514" => StoreError::Constraint(msg),
                    // Foreign key violation
                    "23503" => StoreError::Constraint(msg),
                    _ => StoreError::Backend(msg),
                }
            } else {
                StoreError::Backend(msg)
            }
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("row not found in {operation}"))
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}
