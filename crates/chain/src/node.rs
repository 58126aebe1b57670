use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use supplynet_core::{DomainError, Entity, Money, NodeId, ProductId};

use crate::error::ChainError;
use crate::patch;

/// Textual timestamp format used when a node is serialized.
pub const CREATED_AT_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Kind of node in the distribution hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Factory,
    Retail,
    Entrepreneur,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Factory => "factory",
            NodeType::Retail => "retail",
            NodeType::Entrepreneur => "entrepreneur",
        }
    }

    /// Factories are the origin of products and never have a supplier.
    pub fn is_factory(&self) -> bool {
        *self == NodeType::Factory
    }
}

impl core::fmt::Display for NodeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for NodeType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "factory" => Ok(NodeType::Factory),
            "retail" => Ok(NodeType::Retail),
            "entrepreneur" => Ok(NodeType::Entrepreneur),
            other => Err(DomainError::validation(
                "node_type",
                format!("'{other}' is not one of: factory, retail, entrepreneur"),
            )),
        }
    }
}

/// A node of the distribution network: a factory, a retail chain or an
/// individual entrepreneur.
///
/// `supplier` is a plain id (a weak reference): the hierarchy lives in the
/// store as a self-referencing table, never as nested records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNode {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub supplier: Option<NodeId>,
    pub email: Option<String>,
    pub country: String,
    pub city: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub products: BTreeSet<ProductId>,
    /// What this node owes its supplier.
    pub debt: Option<Money>,
    pub created_at: DateTime<Utc>,
}

impl Entity for ChainNode {
    type Id = NodeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Payload: create a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewNode {
    pub name: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub supplier: Option<NodeId>,
    #[serde(default)]
    pub email: Option<String>,
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub products: BTreeSet<ProductId>,
    #[serde(default)]
    pub debt: Option<Money>,
}

impl NewNode {
    pub fn into_node(self, id: NodeId, created_at: DateTime<Utc>) -> ChainNode {
        ChainNode {
            id,
            name: self.name,
            node_type: self.node_type,
            supplier: self.supplier,
            email: self.email,
            country: self.country,
            city: self.city,
            street: self.street,
            house_number: self.house_number,
            products: self.products,
            debt: self.debt,
            created_at,
        }
    }
}

/// Payload: partial node update.
///
/// Missing keys keep the stored value; an explicit `null` clears optional
/// fields. `products` goes through the transfer rules rather than plain
/// assignment. `debt` is only captured so the update can be refused.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub node_type: Option<NodeType>,
    #[serde(default, deserialize_with = "patch::explicit")]
    pub supplier: Option<Option<NodeId>>,
    #[serde(default, deserialize_with = "patch::explicit")]
    pub email: Option<Option<String>>,
    pub country: Option<String>,
    #[serde(default, deserialize_with = "patch::explicit")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch::explicit")]
    pub street: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch::explicit")]
    pub house_number: Option<Option<String>>,
    pub products: Option<BTreeSet<ProductId>>,
    #[serde(default, deserialize_with = "patch::present")]
    pub debt: Option<serde_json::Value>,
}

/// Keys a client may echo back from a serialized node; they are ignored.
const READ_ONLY_KEYS: [&str; 2] = ["id", "created_at"];

impl NodeUpdate {
    /// Parse a raw JSON update payload.
    ///
    /// A `debt` key is refused before anything else is looked at, so the
    /// rejection does not depend on the rest of the payload.
    pub fn from_json(payload: serde_json::Value) -> Result<Self, ChainError> {
        let serde_json::Value::Object(mut map) = payload else {
            return Err(DomainError::validation("payload", "expected a JSON object").into());
        };

        crate::debt::guard_payload(&map)?;

        for key in READ_ONLY_KEYS {
            map.remove(key);
        }

        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| DomainError::validation("payload", e.to_string()).into())
    }

    /// The node as it would look with this update's scalar fields applied.
    ///
    /// `products`, `debt` and `created_at` are carried over unchanged.
    pub fn apply_to(&self, node: &ChainNode) -> ChainNode {
        fn pick<T: Clone>(update: &Option<T>, current: &T) -> T {
            update.clone().unwrap_or_else(|| current.clone())
        }

        ChainNode {
            id: node.id,
            name: pick(&self.name, &node.name),
            node_type: self.node_type.unwrap_or(node.node_type),
            supplier: self.supplier.unwrap_or(node.supplier),
            email: pick(&self.email, &node.email),
            country: pick(&self.country, &node.country),
            city: pick(&self.city, &node.city),
            street: pick(&self.street, &node.street),
            house_number: pick(&self.house_number, &node.house_number),
            products: node.products.clone(),
            debt: node.debt,
            created_at: node.created_at,
        }
    }
}

/// Serialized representation of a node handed to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub email: Option<String>,
    pub country: String,
    pub city: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub products: Vec<ProductId>,
    pub supplier: Option<NodeId>,
    pub debt: Option<Money>,
    pub created_at: String,
}

impl From<&ChainNode> for NodeView {
    fn from(node: &ChainNode) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            node_type: node.node_type,
            email: node.email.clone(),
            country: node.country.clone(),
            city: node.city.clone(),
            street: node.street.clone(),
            house_number: node.house_number.clone(),
            products: node.products.iter().copied().collect(),
            supplier: node.supplier,
            debt: node.debt,
            created_at: node.created_at.format(CREATED_AT_FORMAT).to_string(),
        }
    }
}

impl From<ChainNode> for NodeView {
    fn from(node: ChainNode) -> Self {
        NodeView::from(&node)
    }
}
