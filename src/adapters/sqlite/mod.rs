//! SQLite adapters for quench.

pub mod cache_store;
pub mod connection;
pub mod migrations;

pub use cache_store::SqliteCacheStore;
pub use connection::{create_pool, create_test_pool, database_url, verify_connection, ConnectionError, PoolConfig};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
