//! Infrastructure layer: data access for the inventory transaction manager.

pub mod sale_store;

pub use sale_store::{
    InMemoryStore, NewSale, PostgresSaleStore, SaleStore, SaleTx, StoreError,
};
