//! Storage trait for the exchange engine.
//!
//! This module defines the `Storage` trait, which persists items, requests and
//! messages. Every write that races with another caller is a conditional write
//! checked atomically inside the backend, so the engine never needs to hold a
//! lock across an await point.

use async_trait::async_trait;

use crate::config::SiblingPolicy;
use crate::domain::item::{Item, ItemFilter, ItemId, ItemStatus, UserId};
use crate::domain::message::{Message, NewMessage};
use crate::domain::request::{Accepted, AnyRequest, Pending, Rejected, Request, RequestId};
use crate::error::Result;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// Storage trait for persisting and querying exchange records.
///
/// Implementations must serialize conditional writes per item: two callers
/// racing on the same item observe one winner, the other gets `Conflict`.
/// Writes on different items must not block each other.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Insert a freshly listed item.
    async fn insert_item(&self, item: &Item) -> Result<()>;

    /// Get an item by ID.
    async fn get_item(&self, item_id: ItemId) -> Result<Item>;

    /// List items matching the filter, newest first.
    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>>;

    /// Atomically move an item from `expected` to `next`.
    ///
    /// # Errors
    /// - `ItemNotFound` if the item does not exist
    /// - `Conflict` if the current status is not `expected`
    /// - `InvalidState` if `next` is `available` while the item holds an
    ///   accepted request
    async fn compare_and_set_item_status(
        &self,
        item_id: ItemId,
        expected: ItemStatus,
        next: ItemStatus,
    ) -> Result<Item>;

    /// Insert a pending request.
    ///
    /// # Errors
    /// - `ItemNotFound` if the target item does not exist
    /// - `InvalidState` if the item is not `available` at insert time
    async fn insert_request(&self, request: &Request<Pending>) -> Result<()>;

    /// Get a request by ID.
    async fn get_request(&self, request_id: RequestId) -> Result<AnyRequest>;

    /// All requests on an item, oldest first (queue order).
    async fn list_requests_for_item(&self, item_id: ItemId) -> Result<Vec<AnyRequest>>;

    /// All requests made by a user, newest first.
    async fn list_requests_by_requester(&self, requester_id: UserId) -> Result<Vec<AnyRequest>>;

    /// Commit an acceptance: request `pending -> accepted` and its item
    /// `available -> reserved` as one unit, rejecting pending siblings when
    /// the policy says so.
    ///
    /// Returns the reserved item and any siblings rejected in the same unit.
    ///
    /// # Errors
    /// - `Conflict` if the request is no longer pending, the item is no longer
    ///   available, or the item already has an accepted request. Nothing is
    ///   written in that case.
    async fn commit_acceptance(
        &self,
        request: &Request<Accepted>,
        policy: SiblingPolicy,
    ) -> Result<(Item, Vec<Request<Rejected>>)>;

    /// Commit a rejection: request `pending -> rejected`.
    ///
    /// # Errors
    /// - `Conflict` if the request is no longer pending
    async fn commit_rejection(&self, request: &Request<Rejected>) -> Result<()>;

    /// Append a message, assigning its id and timestamp.
    ///
    /// # Errors
    /// - `RequestNotFound` if the request does not exist
    async fn append_message(&self, message: NewMessage) -> Result<Message>;

    /// Full message history of a request, by `(created_at, id)` ascending.
    async fn list_messages(&self, request_id: RequestId) -> Result<Vec<Message>>;
}
