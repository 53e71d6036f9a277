//! Read/write pool routing for [`PostgresStorage`](super::PostgresStorage).
//!
//! The storage backend sends a statement to [`PoolProvider::read`] only when a
//! stale answer is harmless, and everything else to [`PoolProvider::write`]:
//!
//! | `Storage` call | pool |
//! |---|---|
//! | `list_items`, `list_requests_for_item`, `list_requests_by_requester`, `list_messages` | `read()` |
//! | `get_item`, `get_request`, the item check in `list_requests_for_item` | `write()` |
//! | every insert, status change and acceptance | `write()` |
//!
//! Point lookups stay on the primary because they feed access and state
//! guards: a request created a moment ago must not read as missing when its
//! participants start chatting or the owner accepts it. Listings may lag a
//! replica by a few moments.

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

/// Supplies the pools [`PostgresStorage`](super::PostgresStorage) routes to.
pub trait PoolProvider: Clone + Send + Sync + 'static {
    /// Pool for listings; may be a lagging replica.
    fn read(&self) -> &PgPool;

    /// The primary: writes, row locks and guard lookups.
    fn write(&self) -> &PgPool;
}

/// A single pool serves both sides.
impl PoolProvider for PgPool {
    fn read(&self) -> &PgPool {
        self
    }

    fn write(&self) -> &PgPool {
        self
    }
}

/// A primary with an optional streaming replica for listings.
#[derive(Clone, Debug)]
pub struct ReplicatedPools {
    primary: PgPool,
    replica: Option<PgPool>,
}

impl ReplicatedPools {
    pub fn new(primary: PgPool, replica: Option<PgPool>) -> Self {
        Self { primary, replica }
    }

    /// Connect to the primary and, when `replica_url` is given, the replica.
    pub async fn connect(primary_url: &str, replica_url: Option<&str>) -> Result<Self, sqlx::Error> {
        let primary = PgPool::connect(primary_url).await?;
        let replica = match replica_url {
            Some(url) => Some(PgPool::connect(url).await?),
            None => None,
        };
        Ok(Self { primary, replica })
    }

    pub fn has_replica(&self) -> bool {
        self.replica.is_some()
    }
}

impl PoolProvider for ReplicatedPools {
    fn read(&self) -> &PgPool {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    fn write(&self) -> &PgPool {
        &self.primary
    }
}

/// Pools for tests: the replica side runs every session read-only, so a write
/// routed through `read()` fails instead of passing silently.
#[derive(Clone, Debug)]
pub struct TestDbPools {
    primary: PgPool,
    replica: PgPool,
}

impl TestDbPools {
    pub async fn new(pool: PgPool) -> Result<Self, sqlx::Error> {
        let options: PgConnectOptions = pool
            .connect_options()
            .as_ref()
            .clone()
            .options([("default_transaction_read_only", "on")]);
        let replica = PgPoolOptions::new()
            .max_connections(pool.options().get_max_connections())
            .connect_with(options)
            .await?;

        Ok(Self {
            primary: pool,
            replica,
        })
    }
}

impl PoolProvider for TestDbPools {
    fn read(&self) -> &PgPool {
        &self.replica
    }

    fn write(&self) -> &PgPool {
        &self.primary
    }
}
