//! `supplynet-migrate`: apply the chain schema to the configured database.

use anyhow::Context;

use supplynet_infra::{PostgresChainStore, StoreBackend, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    supplynet_observability::init();

    let config = StoreConfig::from_env().context("failed to load store configuration")?;

    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("SUPPLYNET_STORE=memory, nothing to migrate");
        }
        StoreBackend::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresChainStore::connect(&database_url, max_connections)
                .await
                .context("failed to connect to Postgres")?;
            store.migrate().await.context("failed to apply schema")?;
        }
    }

    Ok(())
}
