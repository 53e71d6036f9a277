//! Core domain types for the exchange engine.
//!
//! This module contains pure domain types with no persistence dependencies:
//! - Items and their availability status
//! - Request typestate machine
//! - Messages exchanged on a request

pub mod item;
pub mod message;
pub mod request;

// Re-export commonly used types from each submodule
pub use item::{ALL_CATEGORIES, Item, ItemFilter, ItemId, ItemStatus, NewItem, UserId};
pub use message::{Message, MessageId, NewMessage};
pub use request::{
    Acceptance, Accepted, AnyRequest, Pending, Rejected, RejectionReason, Request, RequestData,
    RequestId, RequestStatus,
};
