use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use supplynet_chain::{ChainNode, FactoryClaim, NodeFilter, Product, ProductFilter};
use supplynet_core::{Entity, Money, NodeId, ProductId};

use super::{ChainStore, StoreError, StoreTx};

#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    nodes: BTreeMap<NodeId, ChainNode>,
}

/// In-memory chain store.
///
/// Intended for tests/dev. Not optimized for performance: a transaction holds
/// the single table lock for its whole life and works on a copy of the
/// tables, which replaces the shared state on commit. Transactions are
/// therefore fully serialized.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChainStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChainStore for InMemoryChainStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

/// Insert `entity` unless a record with the same id is already stored.
fn insert_new<E: Entity + Clone>(
    table: &mut BTreeMap<E::Id, E>,
    entity: &E,
    kind: &str,
) -> Result<(), StoreError> {
    let id = *entity.id();
    if table.contains_key(&id) {
        return Err(StoreError::Conflict(format!("{kind} {id} already exists")));
    }
    table.insert(id, entity.clone());
    Ok(())
}

impl InMemoryTx {
    fn node_mut(&mut self, id: NodeId) -> Option<&mut ChainNode> {
        self.working.nodes.get_mut(&id)
    }
}

#[async_trait::async_trait]
impl StoreTx for InMemoryTx {
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        insert_new(&mut self.working.products, product, "product")
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn existing_products(
        &mut self,
        ids: &BTreeSet<ProductId>,
    ) -> Result<BTreeSet<ProductId>, StoreError> {
        Ok(ids
            .iter()
            .filter(|id| self.working.products.contains_key(*id))
            .copied()
            .collect())
    }

    async fn list_products(&mut self, filter: &ProductFilter) -> Result<Vec<Product>, StoreError> {
        let mut products: Vec<Product> = self
            .working
            .products
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(products)
    }

    async fn update_product(&mut self, product: &Product) -> Result<bool, StoreError> {
        match self.working.products.get_mut(&product.id) {
            Some(stored) => {
                *stored = product.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_product(&mut self, id: ProductId) -> Result<bool, StoreError> {
        if self.working.products.remove(&id).is_none() {
            return Ok(false);
        }
        for node in self.working.nodes.values_mut() {
            node.products.remove(&id);
        }
        Ok(true)
    }

    async fn insert_node(&mut self, node: &ChainNode) -> Result<(), StoreError> {
        if let Some(supplier) = node.supplier {
            if !self.working.nodes.contains_key(&supplier) {
                return Err(StoreError::Integrity(format!("supplier {supplier} does not exist")));
            }
        }
        if let Some(missing) = node.products.iter().find(|p| !self.working.products.contains_key(*p)) {
            return Err(StoreError::Integrity(format!("product {missing} does not exist")));
        }
        insert_new(&mut self.working.nodes, node, "node")
    }

    async fn node(&mut self, id: NodeId) -> Result<Option<ChainNode>, StoreError> {
        Ok(self.working.nodes.get(&id).cloned())
    }

    async fn list_nodes(&mut self, filter: &NodeFilter) -> Result<Vec<ChainNode>, StoreError> {
        let mut nodes: Vec<ChainNode> = self
            .working
            .nodes
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn update_node(&mut self, node: &ChainNode) -> Result<bool, StoreError> {
        if let Some(supplier) = node.supplier {
            if !self.working.nodes.contains_key(&supplier) {
                return Err(StoreError::Integrity(format!("supplier {supplier} does not exist")));
            }
        }
        let Some(stored) = self.node_mut(node.id) else {
            return Ok(false);
        };
        stored.name = node.name.clone();
        stored.node_type = node.node_type;
        stored.supplier = node.supplier;
        stored.email = node.email.clone();
        stored.country = node.country.clone();
        stored.city = node.city.clone();
        stored.street = node.street.clone();
        stored.house_number = node.house_number.clone();
        Ok(true)
    }

    async fn delete_node(&mut self, id: NodeId) -> Result<bool, StoreError> {
        if self.working.nodes.remove(&id).is_none() {
            return Ok(false);
        }
        for node in self.working.nodes.values_mut() {
            if node.supplier == Some(id) {
                node.supplier = None;
            }
        }
        Ok(true)
    }

    async fn attach_product(&mut self, node: NodeId, product: ProductId) -> Result<bool, StoreError> {
        if !self.working.products.contains_key(&product) {
            return Err(StoreError::Integrity(format!("product {product} does not exist")));
        }
        match self.node_mut(node) {
            Some(n) => Ok(n.products.insert(product)),
            None => Err(StoreError::Integrity(format!("node {node} does not exist"))),
        }
    }

    async fn detach_product(&mut self, node: NodeId, product: ProductId) -> Result<bool, StoreError> {
        Ok(self
            .node_mut(node)
            .map(|n| n.products.remove(&product))
            .unwrap_or(false))
    }

    async fn replace_products(
        &mut self,
        node: NodeId,
        products: &BTreeSet<ProductId>,
    ) -> Result<(), StoreError> {
        if let Some(missing) = products.iter().find(|p| !self.working.products.contains_key(*p)) {
            return Err(StoreError::Integrity(format!("product {missing} does not exist")));
        }
        match self.node_mut(node) {
            Some(n) => {
                n.products = products.clone();
                Ok(())
            }
            None => Err(StoreError::Integrity(format!("node {node} does not exist"))),
        }
    }

    async fn factory_claims(
        &mut self,
        products: &BTreeSet<ProductId>,
        exclude: Option<NodeId>,
    ) -> Result<Vec<FactoryClaim>, StoreError> {
        let mut claims = Vec::new();
        for product_id in products {
            let Some(product) = self.working.products.get(product_id) else {
                continue;
            };
            for node in self.working.nodes.values() {
                if node.node_type.is_factory()
                    && Some(node.id) != exclude
                    && node.products.contains(product_id)
                {
                    claims.push(FactoryClaim {
                        product_id: *product_id,
                        product_name: product.name.clone(),
                        factory_id: node.id,
                    });
                }
            }
        }
        Ok(claims)
    }

    async fn set_debt(&mut self, ids: &BTreeSet<NodeId>, amount: Money) -> Result<u64, StoreError> {
        let mut updated = 0;
        for id in ids {
            if let Some(node) = self.node_mut(*id) {
                node.debt = Some(amount);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use supplynet_chain::{NewNode, NodeType};

    fn product(name: &str) -> Product {
        Product {
            id: ProductId::new(),
            name: name.to_string(),
            model: "M1".to_string(),
            release_date: None,
        }
    }

    fn node(node_type: NodeType, supplier: Option<NodeId>, products: &[ProductId]) -> ChainNode {
        NewNode {
            name: "Node".to_string(),
            node_type,
            supplier,
            email: None,
            country: "Poland".to_string(),
            city: None,
            street: None,
            house_number: None,
            products: products.iter().copied().collect(),
            debt: None,
        }
        .into_node(NodeId::new(), Utc::now())
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryChainStore::new();
        let p = product("Radio");

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.product(p.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = InMemoryChainStore::new();
        let p = product("Radio");

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.product(p.id).await.unwrap(), Some(p));
    }

    #[tokio::test]
    async fn deleting_a_supplier_orphans_its_clients() {
        let store = InMemoryChainStore::new();
        let factory = node(NodeType::Factory, None, &[]);
        let retail = node(NodeType::Retail, Some(factory.id), &[]);

        let mut tx = store.begin().await.unwrap();
        tx.insert_node(&factory).await.unwrap();
        tx.insert_node(&retail).await.unwrap();
        assert!(tx.delete_node(factory.id).await.unwrap());

        let stored = tx.node(retail.id).await.unwrap().unwrap();
        assert_eq!(stored.supplier, None);
    }

    #[tokio::test]
    async fn detach_reports_missing_rows() {
        let store = InMemoryChainStore::new();
        let p = product("Radio");
        let factory = node(NodeType::Factory, None, &[p.id]);

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.insert_node(&factory).await.unwrap();

        assert!(tx.detach_product(factory.id, p.id).await.unwrap());
        assert!(!tx.detach_product(factory.id, p.id).await.unwrap());
    }

    #[tokio::test]
    async fn factory_claims_skip_excluded_and_non_factories() {
        let store = InMemoryChainStore::new();
        let p = product("Radio");
        let f1 = node(NodeType::Factory, None, &[p.id]);
        let f2 = node(NodeType::Factory, None, &[]);
        let retail = node(NodeType::Retail, Some(f1.id), &[p.id]);

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.insert_node(&f1).await.unwrap();
        tx.insert_node(&f2).await.unwrap();
        tx.insert_node(&retail).await.unwrap();

        let ids = BTreeSet::from([p.id]);
        let claims = tx.factory_claims(&ids, Some(f2.id)).await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].factory_id, f1.id);
        assert_eq!(claims[0].product_name, "Radio");

        assert!(tx.factory_claims(&ids, Some(f1.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_node_leaves_debt_and_products_alone() {
        let store = InMemoryChainStore::new();
        let p = product("Radio");
        let mut factory = node(NodeType::Factory, None, &[p.id]);
        factory.debt = Some(Money::from_cents(500).unwrap());

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.insert_node(&factory).await.unwrap();

        let mut changed = factory.clone();
        changed.name = "Renamed".to_string();
        changed.debt = None;
        changed.products.clear();
        assert!(tx.update_node(&changed).await.unwrap());

        let stored = tx.node(factory.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.debt, factory.debt);
        assert_eq!(stored.products, factory.products);
    }
}
