//! Infrastructure layer: storage backends, the engine API and configuration.

/// Transactional persistence of products, nodes and memberships.
pub mod store;

/// The supply-chain consistency engine exposed to the transport layer.
pub mod service;

/// Configuration loading and representation.
pub mod config;


pub use config::{open_store, ConfigError, StoreBackend, StoreConfig};
pub use service::{ChainService, ServiceError};
pub use store::{ChainStore, InMemoryChainStore, PostgresChainStore, StoreError, StoreTx};
