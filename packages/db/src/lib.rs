//! Storage for the job queue.
//!
//! The worker depends only on the [`Datastore`] trait. Two backends ship:
//! [`MemoryStore`] for tests and single-process use, and [`SurrealStore`],
//! which works against any SurrealDB engine and is what a fleet of workers
//! shares.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//! - `remote`: Connect to a SurrealDB server over WebSocket

mod connection;
mod keys;
mod memory;
mod schema;
mod store;
mod surreal;

pub use connection::{Database, DbConfig, connect};
pub use keys::Keys;
pub use memory::MemoryStore;
pub use schema::init_schema;
pub use store::{
    Datastore, STARTED_FORMAT, StoreError, format_heartbeat, format_started, parse_heartbeat,
    parse_started,
};
pub use surreal::SurrealStore;

/// Key prefix used unless configured otherwise.
pub const DEFAULT_PREFIX: &str = "resque";
