//! Validation engine.
//!
//! Pure checks run by the write path before anything is committed. The
//! "other factories" lookup is done by the caller inside its transaction and
//! handed in as [`FactoryClaim`]s, so nothing here performs IO.

use std::collections::BTreeSet;

use supplynet_core::{DomainError, NodeId, ProductId};

use crate::error::ChainError;
use crate::node::{ChainNode, NodeType};
use crate::product::Product;

pub const NAME_MAX_LEN: usize = 255;
pub const MODEL_MAX_LEN: usize = 100;
pub const ADDRESS_MAX_LEN: usize = 100;
pub const HOUSE_NUMBER_MAX_LEN: usize = 20;
pub const EMAIL_MAX_LEN: usize = 254;

/// A product currently listed by a factory node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryClaim {
    pub product_id: ProductId,
    pub product_name: String,
    pub factory_id: NodeId,
}

/// Structural check of a proposed node state.
///
/// - a factory must not have a supplier;
/// - a retail chain or entrepreneur must have one;
/// - a factory may not list a product that another factory already lists.
///   Claims held by `exclude` (the node being updated) are ignored, so
///   re-saving an unchanged factory never conflicts with itself.
pub fn validate(
    node_type: NodeType,
    supplier: Option<NodeId>,
    proposed_products: &BTreeSet<ProductId>,
    exclude: Option<NodeId>,
    claims: &[FactoryClaim],
) -> Result<(), ChainError> {
    match (node_type, supplier) {
        (NodeType::Factory, Some(supplier)) => {
            return Err(ChainError::InvalidSupplier { supplier });
        }
        (NodeType::Retail | NodeType::Entrepreneur, None) => {
            return Err(ChainError::MissingSupplier { node_type });
        }
        _ => {}
    }

    if !node_type.is_factory() {
        return Ok(());
    }

    for product_id in proposed_products {
        let conflict = claims
            .iter()
            .find(|c| c.product_id == *product_id && Some(c.factory_id) != exclude);
        if let Some(claim) = conflict {
            return Err(ChainError::ProductConflict {
                product_id: claim.product_id,
                product_name: claim.product_name.clone(),
                factory_id: claim.factory_id,
            });
        }
    }

    Ok(())
}

/// The supplier must exist and must not be the node itself.
pub fn validate_supplier_reference(
    node_id: Option<NodeId>,
    supplier: Option<NodeId>,
    supplier_exists: bool,
) -> Result<(), ChainError> {
    let Some(supplier) = supplier else {
        return Ok(());
    };
    if node_id == Some(supplier) {
        return Err(ChainError::SelfSupplier(supplier));
    }
    if !supplier_exists {
        return Err(ChainError::UnknownSupplier(supplier));
    }
    Ok(())
}

/// Every proposed product id must name a stored product.
pub fn validate_products_exist(
    proposed: &BTreeSet<ProductId>,
    known: &BTreeSet<ProductId>,
) -> Result<(), ChainError> {
    match proposed.difference(known).next() {
        Some(missing) => Err(ChainError::UnknownProduct(*missing)),
        None => Ok(()),
    }
}

pub fn validate_node_fields(node: &ChainNode) -> Result<(), ChainError> {
    required("name", &node.name, NAME_MAX_LEN)?;
    required("country", &node.country, ADDRESS_MAX_LEN)?;
    optional("city", node.city.as_deref(), ADDRESS_MAX_LEN)?;
    optional("street", node.street.as_deref(), ADDRESS_MAX_LEN)?;
    optional("house_number", node.house_number.as_deref(), HOUSE_NUMBER_MAX_LEN)?;
    if let Some(email) = node.email.as_deref() {
        validate_email(email)?;
    }
    Ok(())
}

pub fn validate_product_fields(product: &Product) -> Result<(), ChainError> {
    required("name", &product.name, NAME_MAX_LEN)?;
    required("model", &product.model, MODEL_MAX_LEN)?;
    Ok(())
}

fn required(field: &'static str, value: &str, max: usize) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(field, "cannot be empty"));
    }
    max_len(field, value, max)
}

fn optional(field: &'static str, value: Option<&str>, max: usize) -> Result<(), DomainError> {
    match value {
        Some(v) => max_len(field, v, max),
        None => Ok(()),
    }
}

fn max_len(field: &'static str, value: &str, max: usize) -> Result<(), DomainError> {
    if value.chars().count() > max {
        return Err(DomainError::validation(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), DomainError> {
    max_len("email", email, EMAIL_MAX_LEN)?;

    let invalid = || DomainError::validation("email", "enter a valid email address");
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || local.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2
        || labels
            .iter()
            .any(|l| l.is_empty() || !l.chars().all(|c| c.is_alphanumeric() || c == '-'))
    {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NewNode;
    use chrono::Utc;

    fn claim(product_id: ProductId, factory_id: NodeId) -> FactoryClaim {
        FactoryClaim {
            product_id,
            product_name: "Laptop".to_string(),
            factory_id,
        }
    }

    fn node_with(email: Option<&str>, name: &str) -> ChainNode {
        NewNode {
            name: name.to_string(),
            node_type: NodeType::Retail,
            supplier: Some(NodeId::new()),
            email: email.map(str::to_string),
            country: "France".to_string(),
            city: None,
            street: None,
            house_number: None,
            products: BTreeSet::new(),
            debt: None,
        }
        .into_node(NodeId::new(), Utc::now())
    }

    #[test]
    fn factory_with_supplier_is_rejected() {
        let supplier = NodeId::new();
        let err = validate(NodeType::Factory, Some(supplier), &BTreeSet::new(), None, &[]).unwrap_err();
        assert_eq!(err, ChainError::InvalidSupplier { supplier });
    }

    #[test]
    fn entrepreneur_without_supplier_is_rejected() {
        let err = validate(NodeType::Entrepreneur, None, &BTreeSet::new(), None, &[]).unwrap_err();
        assert_eq!(err, ChainError::MissingSupplier { node_type: NodeType::Entrepreneur });
    }

    #[test]
    fn retail_with_supplier_is_accepted() {
        assert!(validate(NodeType::Retail, Some(NodeId::new()), &BTreeSet::new(), None, &[]).is_ok());
    }

    #[test]
    fn factory_claiming_another_factorys_product_is_rejected() {
        let product = ProductId::new();
        let other = NodeId::new();
        let proposed = BTreeSet::from([product]);

        let err = validate(NodeType::Factory, None, &proposed, None, &[claim(product, other)]).unwrap_err();
        match err {
            ChainError::ProductConflict { product_id, factory_id, product_name } => {
                assert_eq!(product_id, product);
                assert_eq!(factory_id, other);
                assert_eq!(product_name, "Laptop");
            }
            _ => panic!("Expected ProductConflict error"),
        }
    }

    #[test]
    fn factory_resaving_its_own_products_is_accepted() {
        let product = ProductId::new();
        let me = NodeId::new();
        let proposed = BTreeSet::from([product]);

        assert!(validate(NodeType::Factory, None, &proposed, Some(me), &[claim(product, me)]).is_ok());
    }

    #[test]
    fn non_factory_products_are_not_checked_against_claims() {
        let product = ProductId::new();
        let proposed = BTreeSet::from([product]);
        let claims = [claim(product, NodeId::new())];

        assert!(validate(NodeType::Retail, Some(NodeId::new()), &proposed, None, &claims).is_ok());
    }

    #[test]
    fn supplier_reference_rules() {
        let me = NodeId::new();
        let other = NodeId::new();

        assert!(validate_supplier_reference(Some(me), None, false).is_ok());
        assert!(validate_supplier_reference(Some(me), Some(other), true).is_ok());
        assert_eq!(
            validate_supplier_reference(Some(me), Some(me), true).unwrap_err(),
            ChainError::SelfSupplier(me)
        );
        assert_eq!(
            validate_supplier_reference(None, Some(other), false).unwrap_err(),
            ChainError::UnknownSupplier(other)
        );
    }

    #[test]
    fn unknown_products_are_reported() {
        let known = ProductId::new();
        let missing = ProductId::new();
        let proposed = BTreeSet::from([known, missing]);

        let err = validate_products_exist(&proposed, &BTreeSet::from([known])).unwrap_err();
        assert_eq!(err, ChainError::UnknownProduct(missing));
    }

    #[test]
    fn node_fields() {
        assert!(validate_node_fields(&node_with(Some("shop@example.com"), "Shop")).is_ok());
        assert!(validate_node_fields(&node_with(None, "   ")).is_err());
        assert!(validate_node_fields(&node_with(Some("shop.example.com"), "Shop")).is_err());
        assert!(validate_node_fields(&node_with(Some("shop@localhost"), "Shop")).is_err());
        assert!(validate_node_fields(&node_with(Some("shop@exa..com"), "Shop")).is_err());

        let mut long = node_with(None, "Shop");
        long.house_number = Some("1".repeat(HOUSE_NUMBER_MAX_LEN + 1));
        let err = validate_node_fields(&long).unwrap_err();
        assert_eq!(
            err,
            ChainError::Domain(DomainError::validation("house_number", "must be at most 20 characters"))
        );
    }

    #[test]
    fn product_fields() {
        let product = Product {
            id: ProductId::new(),
            name: "TV".to_string(),
            model: String::new(),
            release_date: None,
        };
        let err = validate_product_fields(&product).unwrap_err();
        assert_eq!(err, ChainError::Domain(DomainError::validation("model", "cannot be empty")));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn node_type() -> impl Strategy<Value = NodeType> {
            prop_oneof![
                Just(NodeType::Factory),
                Just(NodeType::Retail),
                Just(NodeType::Entrepreneur),
            ]
        }

        proptest! {
            /// Property: accepted proposals always satisfy the supplier pairing.
            #[test]
            fn accepted_proposals_pair_type_and_supplier(
                node_type in node_type(),
                has_supplier in any::<bool>(),
            ) {
                let supplier = has_supplier.then(NodeId::new);
                let accepted = validate(node_type, supplier, &BTreeSet::new(), None, &[]).is_ok();
                prop_assert_eq!(accepted, node_type.is_factory() != has_supplier);
            }

            /// Property: a factory proposal is accepted exactly when no proposed
            /// product is claimed by a different factory.
            #[test]
            fn factory_claims_are_exclusive(
                owned in proptest::collection::vec(any::<bool>(), 1..8),
            ) {
                let me = NodeId::new();
                let other = NodeId::new();
                let products: Vec<ProductId> = owned.iter().map(|_| ProductId::new()).collect();
                let claims: Vec<FactoryClaim> = products
                    .iter()
                    .zip(&owned)
                    .map(|(p, mine)| claim(*p, if *mine { me } else { other }))
                    .collect();
                let proposed: BTreeSet<ProductId> = products.iter().copied().collect();

                let accepted = validate(NodeType::Factory, None, &proposed, Some(me), &claims).is_ok();
                prop_assert_eq!(accepted, owned.iter().all(|mine| *mine));
            }
        }
    }
}
