//! Supply-chain domain module.
//!
//! This crate contains the consistency rules of the distribution network
//! (node/supplier pairing, factory ownership of products, product transfer,
//! the debt guard), implemented purely as deterministic domain logic (no IO,
//! no HTTP, no storage).

pub mod debt;
pub mod error;
pub mod node;
mod patch;
pub mod product;
pub mod query;
pub mod transfer;
pub mod validation;

pub use debt::{ClearDebt, CLEARED_DEBT, DEBT_FIELD};
pub use error::ChainError;
pub use node::{ChainNode, NewNode, NodeType, NodeUpdate, NodeView, CREATED_AT_FORMAT};
pub use product::{NewProduct, Product, ProductUpdate};
pub use query::{NodeFilter, ProductFilter};
pub use transfer::{plan_update_products, require_supplier_for_pull, ProductsPlan};
pub use validation::{validate, FactoryClaim};
