//! Message types: the append-only chat log scoped to one request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::UserId;
use super::request::RequestId;

/// Identity of a message.
///
/// Assigned by storage from a monotonically increasing sequence, so it breaks
/// ties between messages with equal timestamps in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message exchanged between the two participants of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub request_id: RequestId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A validated message waiting for its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub request_id: RequestId,
    pub sender_id: UserId,
    pub body: String,
}

/// Sort key for channel order: timestamp, then identity.
pub fn channel_order(a: &Message, b: &Message) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
}
