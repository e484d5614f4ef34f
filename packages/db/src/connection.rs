//! Database connection management.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;

use crate::StoreError;

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Connection endpoint: `mem://`, `rocksdb://path` or `ws://host:port`
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
    /// Prefix applied to every key
    pub prefix: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "jobqueue".to_string(),
            database: "main".to_string(),
            credentials: None,
            prefix: crate::DEFAULT_PREFIX.to_string(),
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for a SurrealDB server (requires remote feature).
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            endpoint: url.into(),
            ..Default::default()
        }
    }

    /// Read `STORE_ENDPOINT`, `STORE_NAMESPACE`, `STORE_DATABASE`,
    /// `STORE_USERNAME`/`STORE_PASSWORD` and `QUEUE_PREFIX`, falling back to
    /// the in-memory defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("STORE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(namespace) = std::env::var("STORE_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Ok(database) = std::env::var("STORE_DATABASE") {
            config.database = database;
        }
        if let (Ok(username), Ok(password)) = (
            std::env::var("STORE_USERNAME"),
            std::env::var("STORE_PASSWORD"),
        ) {
            config.credentials = Some((username, password));
        }
        if let Ok(prefix) = std::env::var("QUEUE_PREFIX") {
            config.prefix = prefix;
        }
        config
    }

    /// Set the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// An in-memory engine lives inside this process only.
    pub fn is_in_memory(&self) -> bool {
        self.endpoint.starts_with("mem://") || self.endpoint == "memory"
    }
}

/// Open a connection and select the namespace and database.
pub async fn connect(config: &DbConfig) -> Result<Database, StoreError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect_any(config.endpoint.as_str()).await?;

    // Authenticate if credentials provided
    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }

    db.use_ns(&config.namespace).use_db(&config.database).await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}
