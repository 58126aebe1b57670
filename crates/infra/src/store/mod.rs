//! Entity store boundary.
//!
//! A dumb, transactional persistence layer for products, chain nodes, the
//! supplier relation and the product-membership relation. No validation
//! lives here: the service decides, the store records.
//!
//! ## Transactions
//!
//! Every call of the engine runs inside one [`StoreTx`]. Nothing a transaction
//! writes is visible to others until [`StoreTx::commit`]; dropping the
//! transaction without committing rolls it back. Concurrent transactions that
//! try to move the same membership row are serialized by the backend, and the
//! loser sees [`StoreTx::detach_product`] return `false`.

use std::collections::BTreeSet;

use thiserror::Error;

use supplynet_chain::{ChainNode, FactoryClaim, NodeFilter, Product, ProductFilter};
use supplynet_core::{Money, NodeId, ProductId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryChainStore;
pub use postgres::PostgresChainStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A concurrent transaction won a conflicting write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referential or check constraint rejected the write.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Connection, protocol or other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Opens transactions against a backend.
#[async_trait::async_trait]
pub trait ChainStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// Operations available inside one transaction.
#[async_trait::async_trait]
pub trait StoreTx: Send {
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// The subset of `ids` that name stored products.
    async fn existing_products(
        &mut self,
        ids: &BTreeSet<ProductId>,
    ) -> Result<BTreeSet<ProductId>, StoreError>;

    /// Products matching `filter`, ordered by name then id.
    async fn list_products(&mut self, filter: &ProductFilter) -> Result<Vec<Product>, StoreError>;

    /// Overwrite name, model and release date. Returns `false` if absent.
    async fn update_product(&mut self, product: &Product) -> Result<bool, StoreError>;

    /// Delete a product and every membership row that lists it.
    async fn delete_product(&mut self, id: ProductId) -> Result<bool, StoreError>;

    /// Insert a node together with its initial product memberships and debt.
    async fn insert_node(&mut self, node: &ChainNode) -> Result<(), StoreError>;

    async fn node(&mut self, id: NodeId) -> Result<Option<ChainNode>, StoreError>;

    /// Nodes matching `filter`, ordered by creation time then id.
    async fn list_nodes(&mut self, filter: &NodeFilter) -> Result<Vec<ChainNode>, StoreError>;

    /// Overwrite the scalar fields and the supplier of a node.
    ///
    /// `products`, `debt` and `created_at` are never written by this call.
    async fn update_node(&mut self, node: &ChainNode) -> Result<bool, StoreError>;

    /// Delete a node. Nodes it supplied keep existing with no supplier.
    async fn delete_node(&mut self, id: NodeId) -> Result<bool, StoreError>;

    /// Add a membership row. Returns `false` if it already existed.
    async fn attach_product(&mut self, node: NodeId, product: ProductId) -> Result<bool, StoreError>;

    /// Remove a membership row. Returns `false` if there was none.
    async fn detach_product(&mut self, node: NodeId, product: ProductId) -> Result<bool, StoreError>;

    async fn replace_products(
        &mut self,
        node: NodeId,
        products: &BTreeSet<ProductId>,
    ) -> Result<(), StoreError>;

    /// Factory nodes (other than `exclude`) that currently list any of
    /// `products`. Backends lock what they inspect so two transactions cannot
    /// both claim the same product for different factories.
    async fn factory_claims(
        &mut self,
        products: &BTreeSet<ProductId>,
        exclude: Option<NodeId>,
    ) -> Result<Vec<FactoryClaim>, StoreError>;

    /// Set `debt` on every existing node in `ids`; returns how many matched.
    async fn set_debt(&mut self, ids: &BTreeSet<NodeId>, amount: Money) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
