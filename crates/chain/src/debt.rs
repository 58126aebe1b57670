//! Debt guard.
//!
//! `debt` is written at creation and by the bulk clear operation only. The
//! general update path refuses any payload that carries the key, whatever its
//! value.

use std::collections::BTreeSet;

use supplynet_core::{Money, NodeId};

use crate::error::ChainError;
use crate::node::NodeUpdate;

/// Name of the guarded field in update payloads.
pub const DEBT_FIELD: &str = "debt";

/// Value a node's debt takes after it has been cleared.
pub const CLEARED_DEBT: Money = Money::ZERO;

/// Refuse a raw update payload that mentions `debt`.
pub fn guard_payload(payload: &serde_json::Map<String, serde_json::Value>) -> Result<(), ChainError> {
    if payload.contains_key(DEBT_FIELD) {
        return Err(ChainError::ImmutableField { field: DEBT_FIELD });
    }
    Ok(())
}

/// Refuse a typed update that carried a `debt` key.
pub fn guard_update(update: &NodeUpdate) -> Result<(), ChainError> {
    if update.debt.is_some() {
        return Err(ChainError::ImmutableField { field: DEBT_FIELD });
    }
    Ok(())
}

/// Selection of nodes whose debt is to be cleared.
///
/// Duplicated ids collapse, so the count returned by the store never counts a
/// node twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearDebt {
    ids: BTreeSet<NodeId>,
}

impl ClearDebt {
    pub fn new(ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn ids(&self) -> &BTreeSet<NodeId> {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
