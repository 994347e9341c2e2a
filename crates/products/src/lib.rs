//! `stockroom-products` — product catalog records.

pub mod product;

pub use product::{NewProduct, Product};
pub use stockroom_core::ProductId;
