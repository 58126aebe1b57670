//! Read-side filters.
//!
//! The in-memory store evaluates these with `matches`; the Postgres store
//! turns the same fields into a `WHERE` clause.

use serde::Deserialize;

use crate::node::{ChainNode, NodeType};
use crate::product::Product;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeFilter {
    /// Exact country match.
    pub country: Option<String>,
    /// Exact city match.
    pub city: Option<String>,
    pub node_type: Option<NodeType>,
    /// Case-insensitive substring over name, city and country.
    pub search: Option<String>,
}

impl NodeFilter {
    pub fn country(country: impl Into<String>) -> Self {
        Self {
            country: Some(country.into()),
            ..Self::default()
        }
    }

    pub fn search(term: impl Into<String>) -> Self {
        Self {
            search: Some(term.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, node: &ChainNode) -> bool {
        if let Some(country) = &self.country {
            if node.country != *country {
                return false;
            }
        }
        if let Some(city) = &self.city {
            if node.city.as_deref() != Some(city.as_str()) {
                return false;
            }
        }
        if let Some(node_type) = self.node_type {
            if node.node_type != node_type {
                return false;
            }
        }
        match search_term(&self.search) {
            Some(term) => [Some(node.name.as_str()), node.city.as_deref(), Some(node.country.as_str())]
                .into_iter()
                .flatten()
                .any(|field| contains_ci(field, &term)),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductFilter {
    /// Case-insensitive substring over name and model.
    pub search: Option<String>,
}

impl ProductFilter {
    pub fn search(term: impl Into<String>) -> Self {
        Self {
            search: Some(term.into()),
        }
    }

    pub fn matches(&self, product: &Product) -> bool {
        match search_term(&self.search) {
            Some(term) => contains_ci(&product.name, &term) || contains_ci(&product.model, &term),
            None => true,
        }
    }
}

/// Normalized search term; blank terms match everything.
pub fn search_term(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn contains_ci(haystack: &str, lowered_needle: &str) -> bool {
    haystack.to_lowercase().contains(lowered_needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NewNode;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use supplynet_core::{NodeId, ProductId};

    fn shop(name: &str, country: &str, city: Option<&str>) -> ChainNode {
        NewNode {
            name: name.to_string(),
            node_type: NodeType::Retail,
            supplier: Some(NodeId::new()),
            email: None,
            country: country.to_string(),
            city: city.map(str::to_string),
            street: None,
            house_number: None,
            products: BTreeSet::new(),
            debt: None,
        }
        .into_node(NodeId::new(), Utc::now())
    }

    #[test]
    fn country_filter_is_exact() {
        let node = shop("Mega", "Spain", None);
        assert!(NodeFilter::country("Spain").matches(&node));
        assert!(!NodeFilter::country("spain").matches(&node));
        assert!(!NodeFilter::country("Spa").matches(&node));
    }

    #[test]
    fn search_covers_name_city_and_country() {
        let node = shop("Mega Store", "Spain", Some("Madrid"));
        assert!(NodeFilter::search("mega").matches(&node));
        assert!(NodeFilter::search("MADR").matches(&node));
        assert!(NodeFilter::search("pai").matches(&node));
        assert!(!NodeFilter::search("paris").matches(&node));
        assert!(NodeFilter::search("   ").matches(&node));
    }

    #[test]
    fn filters_combine() {
        let node = shop("Mega", "Spain", Some("Madrid"));
        let filter = NodeFilter {
            country: Some("Spain".to_string()),
            node_type: Some(NodeType::Factory),
            ..NodeFilter::default()
        };
        assert!(!filter.matches(&node));
    }

    #[test]
    fn product_search_covers_name_and_model() {
        let product = Product {
            id: ProductId::new(),
            name: "Television".to_string(),
            model: "QLED-55".to_string(),
            release_date: None,
        };
        assert!(ProductFilter::search("tele").matches(&product));
        assert!(ProductFilter::search("qled").matches(&product));
        assert!(!ProductFilter::search("oled-65").matches(&product));
        assert!(ProductFilter::default().matches(&product));
    }
}
