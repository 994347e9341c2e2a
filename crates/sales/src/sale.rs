use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, LineItemId, ProductId, SaleId};

/// Flavor of a sale document.
///
/// Orders come from website checkout, invoices from POS/admin issuance. Both
/// carry a list of line items and drive stock changes identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleKind {
    Order,
    Invoice,
}

impl SaleKind {
    /// Prefix used in document numbers of this kind.
    pub fn document_prefix(&self) -> &'static str {
        match self {
            SaleKind::Order => "ORD",
            SaleKind::Invoice => "INV",
        }
    }

    /// Status a freshly created document of this kind starts in.
    ///
    /// Invoices are issued against completed POS sales, so they skip the
    /// pending stage.
    pub fn initial_status(&self) -> SaleStatus {
        match self {
            SaleKind::Order => SaleStatus::Pending,
            SaleKind::Invoice => SaleStatus::Confirmed,
        }
    }
}

/// Sale document status lifecycle.
///
/// `pending -> confirmed -> delivered`, or `pending -> rejected` (terminal).
/// Only the transition to `confirmed` has an inventory side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Pending,
    Confirmed,
    Delivered,
    Rejected,
}

impl SaleStatus {
    pub fn can_transition_to(&self, next: SaleStatus) -> bool {
        matches!(
            (self, next),
            (SaleStatus::Pending, SaleStatus::Confirmed)
                | (SaleStatus::Pending, SaleStatus::Rejected)
                | (SaleStatus::Confirmed, SaleStatus::Delivered)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SaleStatus::Delivered | SaleStatus::Rejected)
    }
}

/// Line item attached to a sale document.
///
/// `unit_price` and `subtotal` are snapshots captured at sale time, decoupled
/// from the live product price. The set of line items is immutable after
/// creation; no update operation exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub sale_id: SaleId,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub subtotal: u64,
}

/// Sale document record: Order or Invoice header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDocument {
    id: SaleId,
    number: String,
    kind: SaleKind,
    customer_name: String,
    /// Total in smallest currency unit, pre-computed by the caller.
    total: u64,
    status: SaleStatus,
    returned: bool,
    returned_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SaleDocument {
    /// Materialize a sale record (store-side constructor).
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: SaleId,
        number: String,
        kind: SaleKind,
        customer_name: String,
        total: u64,
        status: SaleStatus,
        returned: bool,
        returned_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            number,
            kind,
            customer_name,
            total,
            status,
            returned,
            returned_at,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> SaleId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn kind(&self) -> SaleKind {
        self.kind
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn status(&self) -> SaleStatus {
        self.status
    }

    pub fn is_returned(&self) -> bool {
        self.returned
    }

    pub fn returned_at(&self) -> Option<DateTime<Utc>> {
        self.returned_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Copy of this record with the return flag set.
    ///
    /// The guard against double return lives in the service; this only records
    /// the flag and timestamps.
    pub fn as_returned(&self, now: DateTime<Utc>) -> Self {
        let mut updated = self.clone();
        updated.returned = true;
        updated.returned_at = Some(now);
        updated.updated_at = now;
        updated
    }
}

/// Validated sale header input (no items, no identity yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDraft {
    pub kind: SaleKind,
    pub customer_name: String,
    /// Total in smallest currency unit, pre-computed by the caller.
    pub total: u64,
}

impl SaleDraft {
    pub fn validate(&self) -> DomainResult<()> {
        if self.customer_name.trim().is_empty() {
            return Err(DomainError::validation("customer name cannot be empty"));
        }
        Ok(())
    }
}

/// Line item input: product, quantity, snapshot prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemDraft {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub subtotal: u64,
}

impl LineItemDraft {
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(())
    }

    /// Validate a full item list: non-empty, every quantity positive.
    pub fn validate_items(items: &[LineItemDraft]) -> DomainResult<()> {
        if items.is_empty() {
            return Err(DomainError::validation("sale must have at least one item"));
        }
        for item in items {
            item.validate()?;
        }
        Ok(())
    }
}
