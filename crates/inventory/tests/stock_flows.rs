//! End-to-end flows of the inventory transaction manager against the
//! in-memory store.

use chrono::{Datelike, Utc};

use stockroom_infra::{InMemoryStore, SaleStore, SaleTx, StoreError};
use stockroom_inventory::{InventoryError, InventoryService};
use stockroom_products::{NewProduct, Product};
use stockroom_sales::{LineItemDraft, SaleDraft, SaleKind};

fn service() -> InventoryService<InMemoryStore> {
    stockroom_observability::init();
    InventoryService::new(InMemoryStore::new())
}

fn seed_product(service: &InventoryService<InMemoryStore>, name: &str, stock: i64) -> Product {
    service
        .store()
        .with_transaction::<_, StoreError, _>(|tx| {
            tx.insert_product(
                NewProduct {
                    sku: format!("SKU-{name}"),
                    name: name.to_string(),
                    unit_price: 2500,
                    stock,
                },
                Utc::now(),
            )
        })
        .unwrap()
}

fn stock_of(service: &InventoryService<InMemoryStore>, product: &Product) -> i64 {
    service
        .store()
        .get_product(product.id())
        .unwrap()
        .unwrap()
        .stock()
}

fn item(product: &Product, quantity: i64) -> LineItemDraft {
    LineItemDraft {
        product_id: product.id(),
        quantity,
        unit_price: product.unit_price(),
        subtotal: quantity as u64 * product.unit_price(),
    }
}

fn invoice_draft() -> SaleDraft {
    SaleDraft {
        kind: SaleKind::Invoice,
        customer_name: "Walk-in".to_string(),
        total: 10_000,
    }
}

#[test]
fn sell_four_of_ten_then_return_twice() {
    let service = service();
    let product = seed_product(&service, "Widget", 10);

    let sale = service
        .create_sale_with_items(invoice_draft(), vec![item(&product, 4)], true)
        .unwrap();
    assert_eq!(stock_of(&service, &product), 6);
    assert_eq!(service.store().line_items_for_sale(sale.id()).unwrap().len(), 1);

    let returned = service.return_sale(sale.id()).unwrap();
    assert!(returned.is_returned());
    assert!(returned.returned_at().is_some());
    assert_eq!(stock_of(&service, &product), 10);

    let err = service.return_sale(sale.id()).unwrap_err();
    assert!(matches!(err, InventoryError::AlreadyReturned(id) if id == sale.id()));
    assert_eq!(stock_of(&service, &product), 10);
}

#[test]
fn oversell_fails_and_persists_nothing() {
    let service = service();
    let product = seed_product(&service, "Widget", 3);

    let err = service
        .create_sale_with_items(invoice_draft(), vec![item(&product, 5)], true)
        .unwrap_err();
    assert!(matches!(
        err,
        InventoryError::InsufficientStock { ref product } if product == "Widget"
    ));

    assert_eq!(stock_of(&service, &product), 3);
    // No sale row survived: the next document number is still the first.
    let year = Utc::now().year();
    assert_eq!(
        service.next_document_number(SaleKind::Invoice).unwrap(),
        format!("INV-{year}-00001")
    );
}

#[test]
fn failure_on_a_later_item_rolls_back_earlier_decrements() {
    let service = service();
    let first = seed_product(&service, "First", 50);
    let second = seed_product(&service, "Second", 2);

    let err = service
        .create_sale_with_items(
            invoice_draft(),
            vec![item(&first, 10), item(&second, 5)],
            true,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        InventoryError::InsufficientStock { ref product } if product == "Second"
    ));

    // The first item's decrement did not survive the rollback.
    assert_eq!(stock_of(&service, &first), 50);
    assert_eq!(stock_of(&service, &second), 2);
}

#[test]
fn only_referenced_products_change() {
    let service = service();
    let sold = seed_product(&service, "Sold", 10);
    let bystander = seed_product(&service, "Bystander", 7);

    service
        .create_sale_with_items(invoice_draft(), vec![item(&sold, 4)], true)
        .unwrap();

    assert_eq!(stock_of(&service, &sold), 6);
    assert_eq!(stock_of(&service, &bystander), 7);
}

#[test]
fn return_skips_products_deleted_since_the_sale() {
    let service = service();
    let kept = seed_product(&service, "Kept", 10);
    let doomed = seed_product(&service, "Doomed", 10);

    let sale = service
        .create_sale_with_items(
            invoice_draft(),
            vec![item(&kept, 2), item(&doomed, 3)],
            true,
        )
        .unwrap();
    assert_eq!(stock_of(&service, &kept), 8);
    assert_eq!(stock_of(&service, &doomed), 7);

    service
        .store()
        .with_transaction::<_, StoreError, _>(|tx| tx.delete_product(doomed.id()))
        .unwrap();

    let returned = service.return_sale(sale.id()).unwrap();
    assert!(returned.is_returned());
    assert_eq!(stock_of(&service, &kept), 10);
    assert!(service.store().get_product(doomed.id()).unwrap().is_none());
}

#[test]
fn unknown_sale_cannot_be_returned() {
    let service = service();
    let missing = stockroom_core::SaleId::new();

    let err = service.return_sale(missing).unwrap_err();
    assert!(matches!(err, InventoryError::SaleNotFound(id) if id == missing));
}

#[test]
fn document_numbers_are_strictly_increasing_within_a_year() {
    let service = service();
    let product = seed_product(&service, "Widget", 1000);
    let year = Utc::now().year();

    let mut previous = 0u32;
    for _ in 0..5 {
        let sale = service
            .create_sale_with_items(invoice_draft(), vec![item(&product, 1)], true)
            .unwrap();

        let number: stockroom_sales::DocumentNumber = sale.number().parse().unwrap();
        assert_eq!(number.prefix(), "INV");
        assert_eq!(number.year(), year);
        assert!(number.sequence() > previous);
        previous = number.sequence();
    }
}

#[test]
fn quantity_zero_is_rejected_before_the_transaction() {
    let service = service();
    let product = seed_product(&service, "Widget", 10);

    let err = service
        .create_sale_with_items(invoice_draft(), vec![item(&product, 0)], true)
        .unwrap_err();
    assert!(matches!(err, InventoryError::Validation(_)));
    assert_eq!(stock_of(&service, &product), 10);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: create-then-return restores every product's stock to its
        /// pre-sale value.
        #[test]
        fn create_then_return_is_a_round_trip(
            lines in prop::collection::vec((1i64..=50, 0i64..=50), 1..5)
        ) {
            let service = service();

            let mut products = Vec::new();
            let mut items = Vec::new();
            for (index, (quantity, headroom)) in lines.iter().enumerate() {
                let stock = quantity + headroom;
                let product = seed_product(&service, &format!("P{index}"), stock);
                items.push(item(&product, *quantity));
                products.push((product, stock, *quantity));
            }

            let sale = service
                .create_sale_with_items(invoice_draft(), items, true)
                .unwrap();
            for (product, stock, quantity) in &products {
                prop_assert_eq!(stock_of(&service, product), stock - quantity);
            }

            service.return_sale(sale.id()).unwrap();
            for (product, stock, _) in &products {
                prop_assert_eq!(stock_of(&service, product), *stock);
            }
        }

        /// Property: a failed creation never mutates any stock and persists
        /// no sale.
        #[test]
        fn failed_creation_changes_nothing(
            stocks in prop::collection::vec(0i64..=20, 1..4),
            shortage_extra in 1i64..=10
        ) {
            let service = service();

            let mut products = Vec::new();
            let mut items = Vec::new();
            for (index, stock) in stocks.iter().enumerate() {
                let product = seed_product(&service, &format!("P{index}"), *stock);
                // Ask for one-over-stock on the last item, an in-stock amount
                // before it.
                let quantity = if index == stocks.len() - 1 {
                    stock + shortage_extra
                } else {
                    (*stock).max(1)
                };
                items.push(item(&product, quantity));
                products.push((product, *stock));
            }

            let result = service.create_sale_with_items(invoice_draft(), items, true);
            prop_assert!(result.is_err());

            for (product, stock) in &products {
                prop_assert_eq!(stock_of(&service, product), *stock);
            }
            let year = Utc::now().year();
            prop_assert_eq!(
                service.next_document_number(SaleKind::Invoice).unwrap(),
                format!("INV-{year}-00001")
            );
        }
    }
}
