//! Postgres-backed chain store.
//!
//! Three tables (see `schema.sql`): `products`, `chain_nodes` with a
//! self-referencing `supplier_id`, and the `chain_node_products` membership
//! relation. Referential clean-up is left to the foreign keys: deleting a node
//! nulls `supplier_id` on its clients, deleting a product or a node drops its
//! membership rows.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate id |
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent transaction won |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Concurrent transaction won |
//! | Database (foreign key violation) | `23503` | `Integrity` | Unknown supplier or product |
//! | Database (check constraint violation) | `23514` | `Integrity` | Row rejected by a `CHECK` |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | Other | N/A | `Backend` | Pool closed, network errors, etc. |
//!
//! ## Concurrency
//!
//! Transactions run at `READ COMMITTED`. Pulls are first-committer-wins
//! because the `DELETE` of a membership row blocks on a concurrent delete of
//! the same row and then reports zero affected rows. Factory claims lock the
//! product rows they inspect, so two transactions claiming the same product
//! for different factories serialize.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};
use uuid::Uuid;

use supplynet_chain::{
    ChainNode, FactoryClaim, NodeFilter, NodeType, Product, ProductFilter, query::search_term,
};
use supplynet_core::{Money, NodeId, ProductId};

use super::{ChainStore, StoreError, StoreTx};

const SCHEMA: &str = include_str!("schema.sql");

const NODE_COLUMNS: &str = r#"
    id,
    name,
    node_type,
    supplier_id,
    email,
    country,
    city,
    street,
    house_number,
    debt,
    created_at
"#;

/// Postgres-backed chain store.
///
/// `Send + Sync`; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct PostgresChainStore {
    pool: Arc<PgPool>,
}

impl PostgresChainStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        tracing::info!("chain schema applied");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainStore for PostgresChainStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// One open Postgres transaction. Dropping it without `commit` rolls back.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn load_products_of(
        &mut self,
        node_ids: &[Uuid],
    ) -> Result<BTreeMap<Uuid, BTreeSet<ProductId>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT node_id, product_id
            FROM chain_node_products
            WHERE node_id = ANY($1)
            "#,
        )
        .bind(node_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_memberships", e))?;

        let mut memberships: BTreeMap<Uuid, BTreeSet<ProductId>> = BTreeMap::new();
        for row in rows {
            let node_id: Uuid = row.try_get("node_id").map_err(corrupt)?;
            let product_id: Uuid = row.try_get("product_id").map_err(corrupt)?;
            memberships
                .entry(node_id)
                .or_default()
                .insert(ProductId::from_uuid(product_id));
        }
        Ok(memberships)
    }

    async fn hydrate(&mut self, rows: Vec<PgRow>) -> Result<Vec<ChainNode>, StoreError> {
        let rows = rows
            .iter()
            .map(NodeRow::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut memberships = self.load_products_of(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let products = memberships.remove(&row.id).unwrap_or_default();
                row.into_node(products)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl StoreTx for PgTx {
    #[instrument(level = "debug", skip(self, product), fields(product_id = %product.id), err)]
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, model, release_date)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.model)
        .bind(product.release_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, model, release_date
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_product", e))?;

        row.as_ref().map(ProductRow::from_row).transpose().map(|r| r.map(Into::into))
    }

    async fn existing_products(
        &mut self,
        ids: &BTreeSet<ProductId>,
    ) -> Result<BTreeSet<ProductId>, StoreError> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let rows = sqlx::query("SELECT id FROM products WHERE id = ANY($1)")
            .bind(uuids(ids.iter().map(|id| *id.as_uuid())))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("existing_products", e))?;

        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map(ProductId::from_uuid).map_err(corrupt))
            .collect()
    }

    #[instrument(level = "debug", skip(self), fields(count = tracing::field::Empty), err)]
    async fn list_products(&mut self, filter: &ProductFilter) -> Result<Vec<Product>, StoreError> {
        let pattern = search_term(&filter.search).map(|t| like_pattern(&t));
        let rows = sqlx::query(
            r#"
            SELECT id, name, model, release_date
            FROM products
            WHERE ($1::TEXT IS NULL OR name ILIKE $1 ESCAPE '\' OR model ILIKE $1 ESCAPE '\')
            ORDER BY name COLLATE "C", id
            "#,
        )
        .bind(pattern)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        let products = rows
            .iter()
            .map(|row| ProductRow::from_row(row).map(Product::from))
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("count", products.len());
        Ok(products)
    }

    async fn update_product(&mut self, product: &Product) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, model = $3, release_date = $4
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.model)
        .bind(product.release_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_product(&mut self, id: ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(level = "debug", skip(self, node), fields(node_id = %node.id), err)]
    async fn insert_node(&mut self, node: &ChainNode) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chain_nodes (
                id,
                name,
                node_type,
                supplier_id,
                email,
                country,
                city,
                street,
                house_number,
                debt,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(node.id.as_uuid())
        .bind(&node.name)
        .bind(node.node_type.as_str())
        .bind(node.supplier.map(Uuid::from))
        .bind(&node.email)
        .bind(&node.country)
        .bind(&node.city)
        .bind(&node.street)
        .bind(&node.house_number)
        .bind(node.debt.map(Decimal::from))
        .bind(node.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_node", e))?;

        self.replace_products(node.id, &node.products).await
    }

    async fn node(&mut self, id: NodeId) -> Result<Option<ChainNode>, StoreError> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM chain_nodes WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_node", e))?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(level = "debug", skip(self), fields(count = tracing::field::Empty), err)]
    async fn list_nodes(&mut self, filter: &NodeFilter) -> Result<Vec<ChainNode>, StoreError> {
        let pattern = search_term(&filter.search).map(|t| like_pattern(&t));
        let sql = format!(
            r#"
            SELECT {NODE_COLUMNS}
            FROM chain_nodes
            WHERE ($1::TEXT IS NULL OR country = $1)
              AND ($2::TEXT IS NULL OR city = $2)
              AND ($3::TEXT IS NULL OR node_type = $3)
              AND ($4::TEXT IS NULL
                   OR name ILIKE $4 ESCAPE '\'
                   OR city ILIKE $4 ESCAPE '\'
                   OR country ILIKE $4 ESCAPE '\')
            ORDER BY created_at, id
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&filter.country)
            .bind(&filter.city)
            .bind(filter.node_type.map(|t| t.as_str()))
            .bind(pattern)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_nodes", e))?;

        let nodes = self.hydrate(rows).await?;
        Span::current().record("count", nodes.len());
        Ok(nodes)
    }

    async fn update_node(&mut self, node: &ChainNode) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE chain_nodes
            SET name = $2,
                node_type = $3,
                supplier_id = $4,
                email = $5,
                country = $6,
                city = $7,
                street = $8,
                house_number = $9
            WHERE id = $1
            "#,
        )
        .bind(node.id.as_uuid())
        .bind(&node.name)
        .bind(node.node_type.as_str())
        .bind(node.supplier.map(Uuid::from))
        .bind(&node.email)
        .bind(&node.country)
        .bind(&node.city)
        .bind(&node.street)
        .bind(&node.house_number)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_node", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_node(&mut self, id: NodeId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM chain_nodes WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_node", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn attach_product(&mut self, node: NodeId, product: ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO chain_node_products (node_id, product_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(node.as_uuid())
        .bind(product.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("attach_product", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(level = "debug", skip(self), fields(node_id = %node, product_id = %product), err)]
    async fn detach_product(&mut self, node: NodeId, product: ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM chain_node_products
            WHERE node_id = $1 AND product_id = $2
            "#,
        )
        .bind(node.as_uuid())
        .bind(product.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("detach_product", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_products(
        &mut self,
        node: NodeId,
        products: &BTreeSet<ProductId>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM chain_node_products WHERE node_id = $1")
            .bind(node.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("clear_memberships", e))?;

        if products.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO chain_node_products (node_id, product_id)
            SELECT $1, UNNEST($2::UUID[])
            "#,
        )
        .bind(node.as_uuid())
        .bind(uuids(products.iter().map(|p| *p.as_uuid())))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_memberships", e))?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, products), fields(product_count = products.len()), err)]
    async fn factory_claims(
        &mut self,
        products: &BTreeSet<ProductId>,
        exclude: Option<NodeId>,
    ) -> Result<Vec<FactoryClaim>, StoreError> {
        if products.is_empty() {
            return Ok(Vec::new());
        }
        let ids = uuids(products.iter().map(|p| *p.as_uuid()));

        // Lock in id order so concurrent claimers cannot deadlock.
        sqlx::query("SELECT id FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_products", e))?;

        let rows = sqlx::query(
            r#"
            SELECT m.product_id, p.name AS product_name, m.node_id AS factory_id
            FROM chain_node_products m
            JOIN chain_nodes n ON n.id = m.node_id
            JOIN products p ON p.id = m.product_id
            WHERE m.product_id = ANY($1)
              AND n.node_type = 'factory'
              AND ($2::UUID IS NULL OR n.id <> $2)
            ORDER BY m.product_id, m.node_id
            "#,
        )
        .bind(&ids)
        .bind(exclude.map(Uuid::from))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("factory_claims", e))?;

        rows.iter()
            .map(|row| {
                Ok::<_, StoreError>(FactoryClaim {
                    product_id: ProductId::from_uuid(row.try_get("product_id").map_err(corrupt)?),
                    product_name: row.try_get("product_name").map_err(corrupt)?,
                    factory_id: NodeId::from_uuid(row.try_get("factory_id").map_err(corrupt)?),
                })
            })
            .collect()
    }

    #[instrument(level = "debug", skip(self, ids), fields(node_count = ids.len()), err)]
    async fn set_debt(&mut self, ids: &BTreeSet<NodeId>, amount: Money) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE chain_nodes
            SET debt = $2
            WHERE id = ANY($1)
            "#,
        )
        .bind(uuids(ids.iter().map(|id| *id.as_uuid())))
        .bind(amount.amount())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("set_debt", e))?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgTx { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn uuids(ids: impl Iterator<Item = Uuid>) -> Vec<Uuid> {
    ids.collect()
}

/// `%term%` with the `LIKE` metacharacters of `term` escaped.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn corrupt(err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(format!("failed to decode row: {err}"))
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("23503") | Some("23514") => StoreError::Integrity(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    id: Uuid,
    name: String,
    model: String,
    release_date: Option<NaiveDate>,
}

impl ProductRow {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        Ok(ProductRow {
            id: row.try_get("id").map_err(corrupt)?,
            name: row.try_get("name").map_err(corrupt)?,
            model: row.try_get("model").map_err(corrupt)?,
            release_date: row.try_get("release_date").map_err(corrupt)?,
        })
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: ProductId::from_uuid(row.id),
            name: row.name,
            model: row.model,
            release_date: row.release_date,
        }
    }
}

#[derive(Debug)]
struct NodeRow {
    id: Uuid,
    name: String,
    node_type: String,
    supplier_id: Option<Uuid>,
    email: Option<String>,
    country: String,
    city: Option<String>,
    street: Option<String>,
    house_number: Option<String>,
    debt: Option<Decimal>,
    created_at: DateTime<Utc>,
}

impl NodeRow {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        Ok(NodeRow {
            id: row.try_get("id").map_err(corrupt)?,
            name: row.try_get("name").map_err(corrupt)?,
            node_type: row.try_get("node_type").map_err(corrupt)?,
            supplier_id: row.try_get("supplier_id").map_err(corrupt)?,
            email: row.try_get("email").map_err(corrupt)?,
            country: row.try_get("country").map_err(corrupt)?,
            city: row.try_get("city").map_err(corrupt)?,
            street: row.try_get("street").map_err(corrupt)?,
            house_number: row.try_get("house_number").map_err(corrupt)?,
            debt: row.try_get("debt").map_err(corrupt)?,
            created_at: row.try_get("created_at").map_err(corrupt)?,
        })
    }

    fn into_node(self, products: BTreeSet<ProductId>) -> Result<ChainNode, StoreError> {
        let node_type = NodeType::from_str(&self.node_type)
            .map_err(|e| StoreError::Corrupt(format!("node {}: {e}", self.id)))?;
        let debt = self
            .debt
            .map(Money::new)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("node {}: {e}", self.id)))?;

        Ok(ChainNode {
            id: NodeId::from_uuid(self.id),
            name: self.name,
            node_type,
            supplier: self.supplier_id.map(NodeId::from_uuid),
            email: self.email,
            country: self.country,
            city: self.city,
            street: self.street,
            house_number: self.house_number,
            products,
            debt,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("tv"), "%tv%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn schema_declares_every_table() {
        for table in ["products", "chain_nodes", "chain_node_products"] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
        assert!(SCHEMA.contains("ON DELETE SET NULL"));
    }

    fn row(debt: Option<Decimal>) -> NodeRow {
        NodeRow {
            id: Uuid::now_v7(),
            name: "Outlet".to_string(),
            node_type: "retail".to_string(),
            supplier_id: Some(Uuid::now_v7()),
            email: None,
            country: "Spain".to_string(),
            city: None,
            street: None,
            house_number: None,
            debt,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn numeric_debt_decodes_at_two_decimals() {
        let node = row(Some(Decimal::new(12505, 1))).into_node(BTreeSet::new()).unwrap();
        assert_eq!(node.debt.map(|d| d.to_string()).as_deref(), Some("1250.50"));

        let node = row(None).into_node(BTreeSet::new()).unwrap();
        assert_eq!(node.debt, None);
    }

    #[test]
    fn out_of_range_debt_is_corrupt() {
        let err = row(Some(Decimal::new(1_000_000_000, 0))).into_node(BTreeSet::new()).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn pool_closed_maps_to_backend() {
        let err = map_sqlx_error("list_nodes", sqlx::Error::PoolClosed);
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("list_nodes")));
    }
}
