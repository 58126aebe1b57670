//! Engine API.
//!
//! `ChainService` is what the transport layer calls. Every operation runs in
//! exactly one store transaction:
//!
//! ```text
//! request
//!   ↓
//! 1. Debt guard (node updates only)
//!   ↓
//! 2. Load current state inside the transaction
//!   ↓
//! 3. Validate (field checks, node-type/supplier pairing, factory ownership,
//!    supplier and product references)
//!   ↓
//! 4. Plan the product-list edit (replace or pull from the supplier)
//!   ↓
//! 5. Write, then commit
//! ```
//!
//! Any rejection returns before `commit`; the transaction is dropped and
//! nothing it wrote survives.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{instrument, Span};

use supplynet_chain::debt::guard_update;
use supplynet_chain::validation::{
    validate_node_fields, validate_product_fields, validate_products_exist,
    validate_supplier_reference,
};
use supplynet_chain::{
    plan_update_products, require_supplier_for_pull, validate, ChainError, ChainNode, ClearDebt,
    FactoryClaim, NewNode, NewProduct, NodeFilter, NodeUpdate, NodeView, Product, ProductFilter,
    ProductUpdate, ProductsPlan, CLEARED_DEBT,
};
use supplynet_core::{DomainError, NodeId, ProductId};

use crate::store::{ChainStore, InMemoryChainStore, StoreError, StoreTx};

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The call was rejected by a consistency rule; nothing was written.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The backend failed; the transaction was rolled back.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        ServiceError::Chain(value.into())
    }
}

impl ServiceError {
    /// Stable machine-readable code for the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Chain(e) => e.code(),
            ServiceError::Store(StoreError::Conflict(_)) => "conflict",
            ServiceError::Store(_) => "store_error",
        }
    }

    /// The rule that rejected the call, if any.
    pub fn as_chain(&self) -> Option<&ChainError> {
        match self {
            ServiceError::Chain(e) => Some(e),
            ServiceError::Store(_) => None,
        }
    }
}

/// Supply-chain consistency engine.
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct ChainService {
    store: Arc<dyn ChainStore>,
}

impl std::fmt::Debug for ChainService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainService").finish_non_exhaustive()
    }
}

impl ChainService {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self { store }
    }

    /// Service over a fresh in-memory store (tests/dev).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryChainStore::new()))
    }

    // Products

    #[instrument(skip(self, new), fields(product_id = tracing::field::Empty))]
    pub async fn create_product(&self, new: NewProduct) -> Result<Product, ServiceError> {
        let result = async {
            let product = new.into_product(ProductId::new());
            Span::current().record("product_id", tracing::field::display(product.id));
            validate_product_fields(&product)?;

            let mut tx = self.store.begin().await?;
            tx.insert_product(&product).await?;
            tx.commit().await?;
            Ok::<_, ServiceError>(product)
        }
        .await;
        outcome("create_product", result)
    }

    #[instrument(skip(self, update), fields(product_id = %id))]
    pub async fn update_product(
        &self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<Product, ServiceError> {
        let result = async {
            let mut tx = self.store.begin().await?;
            let current = tx
                .product(id)
                .await?
                .ok_or_else(|| DomainError::not_found("product", id))?;

            let product = update.apply_to(&current);
            validate_product_fields(&product)?;

            tx.update_product(&product).await?;
            tx.commit().await?;
            Ok::<_, ServiceError>(product)
        }
        .await;
        outcome("update_product", result)
    }

    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn get_product(&self, id: ProductId) -> Result<Product, ServiceError> {
        let mut tx = self.store.begin().await?;
        let product = tx
            .product(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", id))?;
        Ok(product)
    }

    /// Delete a product. Nodes that listed it simply stop listing it.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn delete_product(&self, id: ProductId) -> Result<(), ServiceError> {
        let result = async {
            let mut tx = self.store.begin().await?;
            if !tx.delete_product(id).await? {
                return Err(DomainError::not_found("product", id).into());
            }
            tx.commit().await?;
            Ok::<_, ServiceError>(())
        }
        .await;
        outcome("delete_product", result)
    }

    #[instrument(skip(self))]
    pub async fn list_products(&self, filter: ProductFilter) -> Result<Vec<Product>, ServiceError> {
        let mut tx = self.store.begin().await?;
        let products = tx.list_products(&filter).await?;
        tracing::debug!(count = products.len(), "listed products");
        Ok(products)
    }

    // Nodes

    /// Create a node with its initial product list and debt.
    ///
    /// The initial product list is assigned as given; nothing is pulled from
    /// the supplier at creation.
    #[instrument(
        skip(self, new),
        fields(node_id = tracing::field::Empty, node_type = %new.node_type)
    )]
    pub async fn create_node(&self, new: NewNode) -> Result<NodeView, ServiceError> {
        let result = async {
            let node = new.into_node(NodeId::new(), Utc::now());
            Span::current().record("node_id", tracing::field::display(node.id));
            validate_node_fields(&node)?;

            let mut tx = self.store.begin().await?;
            let claims = claims_for(&mut *tx, &node, None).await?;
            validate(node.node_type, node.supplier, &node.products, None, &claims)?;
            check_supplier(&mut *tx, None, node.supplier).await?;
            check_products(&mut *tx, &node.products).await?;

            tx.insert_node(&node).await?;
            tx.commit().await?;
            Ok::<_, ServiceError>(NodeView::from(node))
        }
        .await;
        outcome("create_node", result)
    }

    /// Apply a partial update to a node.
    ///
    /// The node is validated as it would look after the update. When the
    /// update carries `products`, the edit goes through the transfer rules
    /// against the supplier and node type the node has after this same
    /// update, not the stored ones. A product-list edit on a non-factory node
    /// left without a supplier is rejected with `NoSupplier`.
    #[instrument(skip(self, update), fields(node_id = %id))]
    pub async fn update_node(&self, id: NodeId, update: NodeUpdate) -> Result<NodeView, ServiceError> {
        let result = async {
            guard_update(&update)?;

            let mut tx = self.store.begin().await?;
            let current = tx
                .node(id)
                .await?
                .ok_or_else(|| DomainError::not_found("node", id))?;

            let mut merged = update.apply_to(&current);
            if let Some(products) = &update.products {
                merged.products = products.clone();
            }
            validate_node_fields(&merged)?;
            if update.products.is_some() {
                require_supplier_for_pull(&merged)?;
            }

            let claims = claims_for(&mut *tx, &merged, Some(id)).await?;
            validate(merged.node_type, merged.supplier, &merged.products, Some(id), &claims)?;
            check_supplier(&mut *tx, Some(id), merged.supplier).await?;
            if let Some(products) = &update.products {
                check_products(&mut *tx, products).await?;
            }

            tx.update_node(&merged).await?;

            if let Some(products) = &update.products {
                let supplier = match merged.supplier {
                    Some(supplier_id) => tx.node(supplier_id).await?,
                    None => None,
                };
                let plan = plan_update_products(&merged, supplier.as_ref(), products)?;
                apply_plan(&mut *tx, id, plan).await?;
            }

            let stored = tx
                .node(id)
                .await?
                .ok_or_else(|| DomainError::not_found("node", id))?;
            tx.commit().await?;
            Ok::<_, ServiceError>(NodeView::from(stored))
        }
        .await;
        outcome("update_node", result)
    }

    /// Apply a raw JSON update payload.
    ///
    /// `id` and `created_at` keys are ignored; a `debt` key, with any value,
    /// rejects the whole payload.
    pub async fn update_node_json(
        &self,
        id: NodeId,
        payload: serde_json::Value,
    ) -> Result<NodeView, ServiceError> {
        let update = match NodeUpdate::from_json(payload) {
            Ok(update) => update,
            Err(e) => return outcome("update_node", Err(e.into())),
        };
        self.update_node(id, update).await
    }

    /// Edit only the product list of a node.
    pub async fn update_products(
        &self,
        id: NodeId,
        products: BTreeSet<ProductId>,
    ) -> Result<NodeView, ServiceError> {
        let update = NodeUpdate {
            products: Some(products),
            ..NodeUpdate::default()
        };
        self.update_node(id, update).await
    }

    #[instrument(skip(self), fields(node_id = %id))]
    pub async fn get_node(&self, id: NodeId) -> Result<NodeView, ServiceError> {
        let mut tx = self.store.begin().await?;
        let node = tx
            .node(id)
            .await?
            .ok_or_else(|| DomainError::not_found("node", id))?;
        Ok(NodeView::from(node))
    }

    /// Delete a node. Its former clients keep existing without a supplier.
    #[instrument(skip(self), fields(node_id = %id))]
    pub async fn delete_node(&self, id: NodeId) -> Result<(), ServiceError> {
        let result = async {
            let mut tx = self.store.begin().await?;
            if !tx.delete_node(id).await? {
                return Err(DomainError::not_found("node", id).into());
            }
            tx.commit().await?;
            Ok::<_, ServiceError>(())
        }
        .await;
        outcome("delete_node", result)
    }

    /// Set the debt of every selected node to zero.
    ///
    /// Returns how many of the selected nodes existed. Unknown ids are skipped.
    #[instrument(skip(self, selection), fields(selected = selection.ids().len()))]
    pub async fn clear_debt(&self, selection: ClearDebt) -> Result<u64, ServiceError> {
        if selection.is_empty() {
            return Ok(0);
        }
        let result = async {
            let mut tx = self.store.begin().await?;
            let cleared = tx.set_debt(selection.ids(), CLEARED_DEBT).await?;
            tx.commit().await?;
            tracing::info!(cleared, "debt cleared");
            Ok::<_, ServiceError>(cleared)
        }
        .await;
        outcome("clear_debt", result)
    }

    #[instrument(skip(self))]
    pub async fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<NodeView>, ServiceError> {
        let mut tx = self.store.begin().await?;
        let nodes = tx.list_nodes(&filter).await?;
        tracing::debug!(count = nodes.len(), "listed nodes");
        Ok(nodes.into_iter().map(NodeView::from).collect())
    }
}

/// Factory claims on `node`'s products held by other factories.
///
/// Only a factory can conflict, so nothing is looked up (or locked) for other
/// node types.
async fn claims_for(
    tx: &mut dyn StoreTx,
    node: &ChainNode,
    exclude: Option<NodeId>,
) -> Result<Vec<FactoryClaim>, ServiceError> {
    if !node.node_type.is_factory() || node.products.is_empty() {
        return Ok(Vec::new());
    }
    Ok(tx.factory_claims(&node.products, exclude).await?)
}

async fn check_supplier(
    tx: &mut dyn StoreTx,
    node_id: Option<NodeId>,
    supplier: Option<NodeId>,
) -> Result<(), ServiceError> {
    let exists = match supplier {
        Some(supplier_id) if Some(supplier_id) != node_id => tx.node(supplier_id).await?.is_some(),
        _ => false,
    };
    validate_supplier_reference(node_id, supplier, exists)?;
    Ok(())
}

async fn check_products(
    tx: &mut dyn StoreTx,
    products: &BTreeSet<ProductId>,
) -> Result<(), ServiceError> {
    let known = tx.existing_products(products).await?;
    validate_products_exist(products, &known)?;
    Ok(())
}

async fn apply_plan(
    tx: &mut dyn StoreTx,
    node_id: NodeId,
    plan: ProductsPlan,
) -> Result<(), ServiceError> {
    match plan {
        ProductsPlan::Replace(products) => {
            tx.replace_products(node_id, &products).await?;
        }
        ProductsPlan::Pull { supplier, products } => {
            for product_id in products {
                // Another transaction may have pulled it after the plan was made.
                if !tx.detach_product(supplier, product_id).await? {
                    return Err(ChainError::ProductNotAvailable {
                        product_id,
                        supplier_id: supplier,
                    }
                    .into());
                }
                tx.attach_product(node_id, product_id).await?;
            }
        }
    }
    Ok(())
}

/// Log how a write ended and hand the result back.
fn outcome<T>(operation: &'static str, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
    match &result {
        Ok(_) => tracing::info!(operation, "committed"),
        Err(ServiceError::Chain(e)) => {
            tracing::warn!(operation, code = e.code(), error = %e, "rejected")
        }
        Err(e @ ServiceError::Store(_)) => {
            tracing::error!(operation, code = e.code(), error = %e, "store failure")
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_type: supplynet_chain::NodeType, supplier: Option<NodeId>) -> NewNode {
        NewNode {
            name: format!("{node_type} node"),
            node_type,
            supplier,
            email: None,
            country: "Poland".to_string(),
            city: Some("Warsaw".to_string()),
            street: None,
            house_number: None,
            products: BTreeSet::new(),
            debt: None,
        }
    }

    #[test]
    fn error_codes_pass_through() {
        let err = ServiceError::from(ChainError::SelfSupplier(NodeId::new()));
        assert_eq!(err.code(), "self_supplier");

        let err = ServiceError::from(StoreError::Conflict("serialization failure".into()));
        assert_eq!(err.code(), "conflict");
        assert!(err.as_chain().is_none());

        let err = ServiceError::from(DomainError::not_found("node", "x"));
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn unknown_node_is_not_found() {
        let service = ChainService::in_memory();
        let err = service.get_node(NodeId::new()).await.unwrap_err();
        assert_eq!(err.code(), "not_found");

        let err = service.delete_node(NodeId::new()).await.unwrap_err();
        assert!(err.as_chain().is_some_and(ChainError::is_not_found));
    }

    #[tokio::test]
    async fn supplier_must_exist() {
        let service = ChainService::in_memory();
        let ghost = NodeId::new();
        let err = service
            .create_node(node(supplynet_chain::NodeType::Retail, Some(ghost)))
            .await
            .unwrap_err();
        assert_eq!(err.as_chain(), Some(&ChainError::UnknownSupplier(ghost)));
    }

    #[tokio::test]
    async fn node_cannot_supply_itself() {
        let service = ChainService::in_memory();
        let factory = service
            .create_node(node(supplynet_chain::NodeType::Factory, None))
            .await
            .unwrap();
        let retail = service
            .create_node(node(supplynet_chain::NodeType::Retail, Some(factory.id)))
            .await
            .unwrap();

        let update = NodeUpdate {
            supplier: Some(Some(retail.id)),
            ..NodeUpdate::default()
        };
        let err = service.update_node(retail.id, update).await.unwrap_err();
        assert_eq!(err.as_chain(), Some(&ChainError::SelfSupplier(retail.id)));
    }

    #[tokio::test]
    async fn clear_debt_with_no_selection_is_a_no_op() {
        let service = ChainService::in_memory();
        assert_eq!(service.clear_debt(ClearDebt::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_product_in_initial_list_is_rejected() {
        let service = ChainService::in_memory();
        let ghost = ProductId::new();
        let mut new = node(supplynet_chain::NodeType::Factory, None);
        new.products.insert(ghost);

        let err = service.create_node(new).await.unwrap_err();
        assert_eq!(err.as_chain(), Some(&ChainError::UnknownProduct(ghost)));
        assert!(service.list_nodes(NodeFilter::default()).await.unwrap().is_empty());
    }
}
