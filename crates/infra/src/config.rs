//! Store configuration read from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `SUPPLYNET_STORE` | `memory` | `memory` or `postgres` |
//! | `DATABASE_URL` | - | required for `postgres` |
//! | `SUPPLYNET_DB_MAX_CONNECTIONS` | `5` | pool size for `postgres` |

use std::sync::Arc;

use thiserror::Error;

use crate::store::{ChainStore, InMemoryChainStore, PostgresChainStore, StoreError};

pub const STORE_VAR: &str = "SUPPLYNET_STORE";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "SUPPLYNET_DB_MAX_CONNECTIONS";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{STORE_VAR}: unknown store backend '{0}' (expected memory or postgres)")]
    UnknownBackend(String),

    #[error("{DATABASE_URL_VAR} must be set when {STORE_VAR}=postgres")]
    MissingDatabaseUrl,

    #[error("{MAX_CONNECTIONS_VAR}: expected a positive integer, got '{0}'")]
    InvalidMaxConnections(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = lookup(STORE_VAR).unwrap_or_else(|| "memory".to_string());

        match backend.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::default()),
            "postgres" | "postgresql" => {
                let database_url = lookup(DATABASE_URL_VAR)
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigError::MissingDatabaseUrl)?;
                let max_connections = match lookup(MAX_CONNECTIONS_VAR) {
                    Some(raw) => match raw.trim().parse::<u32>() {
                        Ok(n) if n > 0 => n,
                        _ => return Err(ConfigError::InvalidMaxConnections(raw)),
                    },
                    None => DEFAULT_MAX_CONNECTIONS,
                };
                Ok(Self {
                    backend: StoreBackend::Postgres {
                        database_url,
                        max_connections,
                    },
                })
            }
            _ => Err(ConfigError::UnknownBackend(backend)),
        }
    }
}

/// Build the store the configuration names.
///
/// The Postgres store is connected but not migrated; run `supplynet-migrate`
/// (or [`PostgresChainStore::migrate`]) first.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ChainStore>, StoreError> {
    match &config.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory chain store");
            Ok(Arc::new(InMemoryChainStore::new()))
        }
        StoreBackend::Postgres {
            database_url,
            max_connections,
        } => {
            tracing::info!(max_connections, "using postgres chain store");
            let store = PostgresChainStore::connect(database_url, *max_connections).await?;
            Ok(Arc::new(store))
        }
    }
}
