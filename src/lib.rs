//! Coordination engine for peer-to-peer giveaways.
//!
//! An owner lists an item, other users file requests to claim it, the owner
//! accepts exactly one, and the two parties chat on the request to arrange
//! pickup. This crate owns the state machine behind that flow: item
//! availability, the request lifecycle, the rules tying them together, and
//! the message log bound to each request.
//!
//! Everything goes through [`Exchange`], generic over a [`Storage`] backend:
//! [`InMemoryStorage`] by default, or Postgres with the `postgres` feature.
//! [`http::router`] exposes the engine over HTTP.
//!
//! ```ignore
//! let exchange = Exchange::in_memory();
//! let item = exchange.create_item(owner, new_item).await?;
//! let request = exchange.create_request(item.id, requester, "hi").await?;
//! let acceptance = exchange.accept_request(request.data.id, owner).await?;
//! assert_eq!(acceptance.item.status, ItemStatus::Reserved);
//! ```

pub mod access;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod http;
pub mod manager;

// Re-export commonly used types
pub use config::{ExchangeConfig, ServerConfig, SiblingPolicy};
pub use domain::*;
pub use error::{ErrorKind, HandoverError, Result};
pub use exchange::Exchange;
pub use manager::Storage;
pub use manager::memory::InMemoryStorage;
#[cfg(feature = "postgres")]
pub use manager::postgres::{PoolProvider, PostgresStorage, ReplicatedPools, TestDbPools};

/// Get the handover database migrator
///
/// Returns a migrator that can be run against a connection pool.
#[cfg(feature = "postgres")]
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
