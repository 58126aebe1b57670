use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use supplynet_core::{Entity, ProductId};

use crate::patch;

/// A manufactured item that moves down the distribution hierarchy.
///
/// A product's lifetime is independent of the nodes that list it: nodes only
/// own their membership entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub model: String,
    pub release_date: Option<NaiveDate>,
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Payload: create a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewProduct {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
}

impl NewProduct {
    pub fn into_product(self, id: ProductId) -> Product {
        Product {
            id,
            name: self.name,
            model: self.model,
            release_date: self.release_date,
        }
    }
}

/// Payload: partial product update. Missing keys keep the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub model: Option<String>,
    #[serde(default, deserialize_with = "patch::explicit")]
    pub release_date: Option<Option<NaiveDate>>,
}

impl ProductUpdate {
    pub fn apply_to(&self, product: &Product) -> Product {
        Product {
            id: product.id,
            name: self.name.clone().unwrap_or_else(|| product.name.clone()),
            model: self.model.clone().unwrap_or_else(|| product.model.clone()),
            release_date: self.release_date.unwrap_or(product.release_date),
        }
    }
}
