//! Rejections raised by the supply-chain consistency rules.

use thiserror::Error;

use supplynet_core::{DomainError, NodeId, ProductId};

use crate::node::NodeType;

/// A proposed operation was rejected.
///
/// Every variant is a data-integrity rejection of a single call: nothing is
/// retried and nothing has been written when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("a factory cannot have a supplier (got {supplier})")]
    InvalidSupplier { supplier: NodeId },

    #[error("{node_type} node must have a supplier")]
    MissingSupplier { node_type: NodeType },

    #[error("product '{product_name}' ({product_id}) already belongs to factory {factory_id}")]
    ProductConflict {
        product_id: ProductId,
        product_name: String,
        factory_id: NodeId,
    },

    #[error("node {node_id} has no supplier to take products from")]
    NoSupplier { node_id: NodeId },

    #[error("product {product_id} is not available at supplier {supplier_id}")]
    ProductNotAvailable {
        product_id: ProductId,
        supplier_id: NodeId,
    },

    #[error("field '{field}' cannot be changed through a node update")]
    ImmutableField { field: &'static str },

    #[error("supplier {0} does not exist")]
    UnknownSupplier(NodeId),

    #[error("node {0} cannot be its own supplier")]
    SelfSupplier(NodeId),

    #[error("product {0} does not exist")]
    UnknownProduct(ProductId),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ChainError {
    /// Stable machine-readable code for the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::InvalidSupplier { .. } => "invalid_supplier",
            ChainError::MissingSupplier { .. } => "missing_supplier",
            ChainError::ProductConflict { .. } => "product_conflict",
            ChainError::NoSupplier { .. } => "no_supplier",
            ChainError::ProductNotAvailable { .. } => "product_not_available",
            ChainError::ImmutableField { .. } => "immutable_field",
            ChainError::UnknownSupplier(_) => "unknown_supplier",
            ChainError::SelfSupplier(_) => "self_supplier",
            ChainError::UnknownProduct(_) => "unknown_product",
            ChainError::Domain(DomainError::Validation { .. }) => "validation_error",
            ChainError::Domain(DomainError::InvalidId(_)) => "invalid_id",
            ChainError::Domain(DomainError::NotFound { .. }) => "not_found",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ChainError::Domain(DomainError::NotFound { .. }))
    }
}
