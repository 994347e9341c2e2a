use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ProductId};

/// Catalog record: Product.
///
/// `stock` is the only shared mutable resource the inventory core protects.
/// It is mutated exclusively through transaction-scoped store operations;
/// this type only carries the value and answers availability questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    /// Price in smallest currency unit (e.g., cents).
    unit_price: u64,
    /// Units available for sale. Invariant: never negative.
    stock: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    /// Materialize a product record (store-side constructor).
    pub fn from_parts(
        id: ProductId,
        sku: String,
        name: String,
        unit_price: u64,
        stock: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sku,
            name,
            unit_price,
            stock,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn stock(&self) -> i64 {
        self.stock
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Check whether `quantity` units could be deducted without going negative.
    pub fn has_stock_for(&self, quantity: i64) -> bool {
        quantity >= 0 && self.stock >= quantity
    }

    /// Copy of this record with a new stock level and update stamp.
    ///
    /// Rejects negative stock; the store backstops the same invariant with a
    /// constraint.
    pub fn with_stock(&self, stock: i64, updated_at: DateTime<Utc>) -> DomainResult<Self> {
        if stock < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }
        let mut updated = self.clone();
        updated.stock = stock;
        updated.updated_at = updated_at;
        Ok(updated)
    }
}

/// Validated input for creating a catalog product (admin path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub stock: i64,
}

impl NewProduct {
    pub fn validate(&self) -> DomainResult<()> {
        if self.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.stock < 0 {
            return Err(DomainError::validation("stock cannot be negative"));
        }
        Ok(())
    }

    /// Build the stored record, stamping creation time.
    pub fn into_product(self, id: ProductId, now: DateTime<Utc>) -> DomainResult<Product> {
        self.validate()?;
        Ok(Product {
            id,
            sku: self.sku,
            name: self.name,
            unit_price: self.unit_price,
            stock: self.stock,
            created_at: now,
            updated_at: now,
        })
    }
}
