//! Core request types.
//!
//! This module defines the type-safe claim lifecycle using the typestate pattern.
//! A claim starts `Pending` and is decided exactly once, ending `Accepted` or
//! `Rejected`. Both decided states are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::item::{ItemId, UserId};

/// Marker trait for valid request states.
///
/// This trait enables the typestate pattern, ensuring that operations
/// are only performed on requests in valid states.
pub trait RequestState: Send + Sync {}

/// A claim on an item by a user who is not its owner.
///
/// Uses the typestate pattern to ensure type-safe state transitions.
/// The generic parameter `T` represents the current state of the request.
///
/// # Example
/// ```ignore
/// let pending = Request { data, state: Pending {} };
/// // Only a pending request can be accepted or rejected
/// let acceptance = pending.accept(SiblingPolicy::LeavePending, storage).await?;
/// assert_eq!(acceptance.item.status, ItemStatus::Reserved);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request<T: RequestState> {
    /// The immutable claim data.
    #[serde(flatten)]
    pub data: RequestData,
    /// The current state of the request.
    #[serde(flatten)]
    pub state: T,
}

/// Data fixed when the request is created. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestData {
    pub id: RequestId,

    /// The item being claimed
    pub item_id: ItemId,

    /// The user making the claim (never the item owner)
    pub requester_id: UserId,

    /// Free-text note from the requester to the owner
    pub message: String,

    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Request States
// ============================================================================

/// Request is waiting for the owner's decision.
///
/// This is the initial state for all newly submitted requests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Pending {}

impl RequestState for Pending {}

/// The owner accepted this request and the item was reserved for it.
#[derive(Debug, Clone, Serialize)]
pub struct Accepted {
    pub accepted_at: DateTime<Utc>,
}

impl RequestState for Accepted {}

/// Why a request ended up rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The owner explicitly rejected it.
    Owner,
    /// Another request on the same item was accepted under the auto-reject policy.
    SiblingAccepted,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Owner => "owner",
            RejectionReason::SiblingAccepted => "sibling_accepted",
        }
    }
}

impl std::str::FromStr for RejectionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(RejectionReason::Owner),
            "sibling_accepted" => Ok(RejectionReason::SiblingAccepted),
            _ => Err(format!("Invalid rejection reason: {}", s)),
        }
    }
}

/// The request was turned down.
#[derive(Debug, Clone, Serialize)]
pub struct Rejected {
    pub rejected_at: DateTime<Utc>,
    pub reason: RejectionReason,
}

impl RequestState for Rejected {}

/// Unique identifier for a request in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        RequestId(uuid)
    }
}

impl std::ops::Deref for RequestId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Flat status value, as stored in the `status` column and accepted over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    /// Only `pending -> accepted` and `pending -> rejected` exist.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Accepted)
                | (RequestStatus::Pending, RequestStatus::Rejected)
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            _ => Err(format!("Invalid request status: {}", s)),
        }
    }
}

// ============================================================================
// Unified Request Representation
// ============================================================================

/// Enum that can hold a request in any state.
///
/// This is used for storage and API responses where we need to handle
/// requests uniformly regardless of their current state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AnyRequest {
    Pending(Request<Pending>),
    Accepted(Request<Accepted>),
    Rejected(Request<Rejected>),
}

impl AnyRequest {
    /// Get the request ID regardless of state.
    pub fn id(&self) -> RequestId {
        self.data().id
    }

    /// Get the request data regardless of state.
    pub fn data(&self) -> &RequestData {
        match self {
            AnyRequest::Pending(r) => &r.data,
            AnyRequest::Accepted(r) => &r.data,
            AnyRequest::Rejected(r) => &r.data,
        }
    }

    pub fn status(&self) -> RequestStatus {
        match self {
            AnyRequest::Pending(_) => RequestStatus::Pending,
            AnyRequest::Accepted(_) => RequestStatus::Accepted,
            AnyRequest::Rejected(_) => RequestStatus::Rejected,
        }
    }

    /// Check if this request is in the Pending state.
    pub fn is_pending(&self) -> bool {
        matches!(self, AnyRequest::Pending(_))
    }

    /// Check if this request has been decided (Accepted or Rejected).
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// Try to take as a Pending request, consuming self.
    pub fn into_pending(self) -> Option<Request<Pending>> {
        match self {
            AnyRequest::Pending(r) => Some(r),
            _ => None,
        }
    }
}

// Conversion traits for going from typed Request to AnyRequest

impl From<Request<Pending>> for AnyRequest {
    fn from(r: Request<Pending>) -> Self {
        AnyRequest::Pending(r)
    }
}

impl From<Request<Accepted>> for AnyRequest {
    fn from(r: Request<Accepted>) -> Self {
        AnyRequest::Accepted(r)
    }
}

impl From<Request<Rejected>> for AnyRequest {
    fn from(r: Request<Rejected>) -> Self {
        AnyRequest::Rejected(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Request<Pending> {
        Request {
            data: RequestData {
                id: RequestId(Uuid::new_v4()),
                item_id: ItemId(Uuid::new_v4()),
                requester_id: UserId(Uuid::new_v4()),
                message: "can pick up tonight".to_string(),
                created_at: Utc::now(),
            },
            state: Pending {},
        }
    }

    #[test]
    fn test_only_pending_transitions_exist() {
        use RequestStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Accepted.can_transition_to(Rejected));
        assert!(!Accepted.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Accepted));
        assert!(!Rejected.can_transition_to(Pending));
    }

    #[test]
    fn test_any_request_serializes_flat_with_status_tag() {
        let request = pending();
        let id = request.data.id;
        let json = serde_json::to_value(AnyRequest::from(request)).unwrap();

        assert_eq!(json["status"], "pending");
        assert_eq!(json["id"], serde_json::json!(id.0));
        assert_eq!(json["message"], "can pick up tonight");
    }

    #[test]
    fn test_rejected_serializes_reason() {
        let request = pending();
        let rejected = Request {
            data: request.data,
            state: Rejected {
                rejected_at: Utc::now(),
                reason: RejectionReason::SiblingAccepted,
            },
        };
        let json = serde_json::to_value(AnyRequest::from(rejected)).unwrap();

        assert_eq!(json["status"], "rejected");
        assert_eq!(json["reason"], "sibling_accepted");
        assert!(json.get("rejected_at").is_some());
    }

    #[test]
    fn test_terminal_states() {
        let request = pending();
        let any = AnyRequest::from(request.clone());
        assert!(any.is_pending());
        assert!(!any.is_terminal());

        let accepted = AnyRequest::from(Request {
            data: request.data,
            state: Accepted {
                accepted_at: Utc::now(),
            },
        });
        assert!(accepted.is_terminal());
        assert_eq!(accepted.status(), RequestStatus::Accepted);
        assert!(accepted.into_pending().is_none());
    }
}
