//! Product transfer rules.
//!
//! Editing the product list of a factory is a plain replacement. Editing the
//! product list of a retail chain or entrepreneur means pulling each product
//! down from its supplier: the product leaves the supplier and joins the node,
//! so at any instant it sits on a single path through the hierarchy.

use std::collections::BTreeSet;

use supplynet_core::{NodeId, ProductId};

use crate::error::ChainError;
use crate::node::ChainNode;

/// Membership changes decided for one product-list edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductsPlan {
    /// Replace the node's whole product set.
    Replace(BTreeSet<ProductId>),
    /// Move each product from `supplier` to the node. Products the node
    /// already lists and that are not named here stay where they are.
    Pull {
        supplier: NodeId,
        products: Vec<ProductId>,
    },
}

/// A non-factory node can only receive products from its supplier.
pub fn require_supplier_for_pull(node: &ChainNode) -> Result<(), ChainError> {
    if node.node_type.is_factory() || node.supplier.is_some() {
        return Ok(());
    }
    Err(ChainError::NoSupplier { node_id: node.id })
}

/// Decide how `new_products` is applied to `node`.
///
/// `supplier` is the stored record for `node.supplier`, loaded in the same
/// transaction. The decision is all-or-nothing: one unavailable product
/// rejects the whole edit.
pub fn plan_update_products(
    node: &ChainNode,
    supplier: Option<&ChainNode>,
    new_products: &BTreeSet<ProductId>,
) -> Result<ProductsPlan, ChainError> {
    if node.node_type.is_factory() {
        return Ok(ProductsPlan::Replace(new_products.clone()));
    }

    let Some(supplier_id) = node.supplier else {
        return Err(ChainError::NoSupplier { node_id: node.id });
    };
    let supplier = match supplier {
        Some(s) if s.id == supplier_id => s,
        _ => return Err(ChainError::UnknownSupplier(supplier_id)),
    };

    if let Some(missing) = new_products.iter().find(|p| !supplier.products.contains(*p)) {
        return Err(ChainError::ProductNotAvailable {
            product_id: *missing,
            supplier_id,
        });
    }

    Ok(ProductsPlan::Pull {
        supplier: supplier_id,
        products: new_products.iter().copied().collect(),
    })
}
