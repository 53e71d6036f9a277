//! In-memory implementation of [`Storage`].
//!
//! Each item and its requests live together in one aggregate behind its own
//! mutex, stored in a sharded `DashMap`. Conditional writes lock exactly one
//! aggregate, so calls on the same item are serialized and calls on different
//! items run in parallel. The mutex is never held across an await point.
//!
//! State is ephemeral and lost on restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::Storage;
use crate::config::SiblingPolicy;
use crate::domain::item::{Item, ItemFilter, ItemId, ItemStatus, UserId};
use crate::domain::message::{Message, MessageId, NewMessage, channel_order};
use crate::domain::request::{
    Accepted, AnyRequest, Pending, Rejected, RejectionReason, Request, RequestId,
};
use crate::error::{HandoverError, Result};

/// A request plus its insertion sequence, used to break timestamp ties.
#[derive(Debug)]
struct StoredRequest {
    seq: u64,
    request: AnyRequest,
}

/// An item together with every request made on it.
#[derive(Debug)]
struct ItemAggregate {
    seq: u64,
    item: Item,
    requests: Vec<StoredRequest>,
}

impl ItemAggregate {
    fn has_accepted(&self) -> bool {
        self.requests
            .iter()
            .any(|r| matches!(r.request, AnyRequest::Accepted(_)))
    }

    fn position(&self, request_id: RequestId) -> Option<usize> {
        self.requests
            .iter()
            .position(|r| r.request.id() == request_id)
    }
}

/// Thread-safe in-memory storage backend.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    items: DashMap<ItemId, Arc<Mutex<ItemAggregate>>>,
    /// request -> owning item, for lookups by request id
    request_index: DashMap<RequestId, ItemId>,
    messages: DashMap<RequestId, Vec<Message>>,
    sequence: AtomicU64,
    message_sequence: AtomicI64,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Clone the aggregate handle out of the map so no shard lock is held
    /// while the aggregate mutex is taken.
    fn aggregate(&self, item_id: ItemId) -> Result<Arc<Mutex<ItemAggregate>>> {
        self.items
            .get(&item_id)
            .map(|entry| entry.value().clone())
            .ok_or(HandoverError::ItemNotFound(item_id))
    }

    fn aggregate_for_request(&self, request_id: RequestId) -> Result<Arc<Mutex<ItemAggregate>>> {
        let item_id = self
            .request_index
            .get(&request_id)
            .map(|entry| *entry.value())
            .ok_or(HandoverError::RequestNotFound(request_id))?;
        self.aggregate(item_id)
    }

    fn all_aggregates(&self) -> Vec<Arc<Mutex<ItemAggregate>>> {
        self.items
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_item(&self, item: &Item) -> Result<()> {
        let aggregate = ItemAggregate {
            seq: self.next_seq(),
            item: item.clone(),
            requests: Vec::new(),
        };
        match self.items.entry(item.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HandoverError::Conflict(format!(
                "item {} already exists",
                item.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(aggregate)));
                Ok(())
            }
        }
    }

    async fn get_item(&self, item_id: ItemId) -> Result<Item> {
        let aggregate = self.aggregate(item_id)?;
        let item = aggregate.lock().item.clone();
        Ok(item)
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let mut matching: Vec<(u64, Item)> = self
            .all_aggregates()
            .iter()
            .filter_map(|aggregate| {
                let aggregate = aggregate.lock();
                filter
                    .matches(&aggregate.item)
                    .then(|| (aggregate.seq, aggregate.item.clone()))
            })
            .collect();

        // Newest first
        matching.sort_by(|(a_seq, a), (b_seq, b)| {
            b.created_at.cmp(&a.created_at).then(b_seq.cmp(a_seq))
        });

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|(_, item)| item)
            .collect())
    }

    async fn compare_and_set_item_status(
        &self,
        item_id: ItemId,
        expected: ItemStatus,
        next: ItemStatus,
    ) -> Result<Item> {
        let aggregate = self.aggregate(item_id)?;
        let mut aggregate = aggregate.lock();

        if aggregate.item.status != expected {
            return Err(HandoverError::Conflict(format!(
                "item {} is '{}', expected '{}'",
                item_id, aggregate.item.status, expected
            )));
        }
        if next == ItemStatus::Available && aggregate.has_accepted() {
            return Err(HandoverError::InvalidState(format!(
                "item {} has an accepted request and cannot become available again",
                item_id
            )));
        }

        aggregate.item.status = next;
        aggregate.item.updated_at = Utc::now();
        Ok(aggregate.item.clone())
    }

    async fn insert_request(&self, request: &Request<Pending>) -> Result<()> {
        let item_id = request.data.item_id;
        let aggregate = self.aggregate(item_id)?;
        let mut aggregate = aggregate.lock();

        if aggregate.item.status != ItemStatus::Available {
            return Err(HandoverError::InvalidState(format!(
                "item {} is '{}', requests need it 'available'",
                item_id, aggregate.item.status
            )));
        }
        if aggregate.position(request.data.id).is_some() {
            return Err(HandoverError::Conflict(format!(
                "request {} already exists",
                request.data.id
            )));
        }

        aggregate.requests.push(StoredRequest {
            seq: self.next_seq(),
            request: AnyRequest::Pending(request.clone()),
        });
        self.request_index.insert(request.data.id, item_id);
        Ok(())
    }

    async fn get_request(&self, request_id: RequestId) -> Result<AnyRequest> {
        let aggregate = self.aggregate_for_request(request_id)?;
        let aggregate = aggregate.lock();
        aggregate
            .position(request_id)
            .map(|idx| aggregate.requests[idx].request.clone())
            .ok_or(HandoverError::RequestNotFound(request_id))
    }

    async fn list_requests_for_item(&self, item_id: ItemId) -> Result<Vec<AnyRequest>> {
        let aggregate = self.aggregate(item_id)?;
        let aggregate = aggregate.lock();

        let mut requests: Vec<&StoredRequest> = aggregate.requests.iter().collect();
        // Oldest first
        requests.sort_by(|a, b| {
            a.request
                .data()
                .created_at
                .cmp(&b.request.data().created_at)
                .then(a.seq.cmp(&b.seq))
        });
        Ok(requests.into_iter().map(|r| r.request.clone()).collect())
    }

    async fn list_requests_by_requester(&self, requester_id: UserId) -> Result<Vec<AnyRequest>> {
        let mut requests: Vec<(u64, AnyRequest)> = Vec::new();
        for aggregate in self.all_aggregates() {
            let aggregate = aggregate.lock();
            requests.extend(
                aggregate
                    .requests
                    .iter()
                    .filter(|r| r.request.data().requester_id == requester_id)
                    .map(|r| (r.seq, r.request.clone())),
            );
        }

        // Newest first
        requests.sort_by(|(a_seq, a), (b_seq, b)| {
            b.data()
                .created_at
                .cmp(&a.data().created_at)
                .then(b_seq.cmp(a_seq))
        });
        Ok(requests.into_iter().map(|(_, r)| r).collect())
    }

    async fn commit_acceptance(
        &self,
        request: &Request<Accepted>,
        policy: SiblingPolicy,
    ) -> Result<(Item, Vec<Request<Rejected>>)> {
        let request_id = request.data.id;
        let aggregate = self.aggregate(request.data.item_id)?;
        let mut aggregate = aggregate.lock();

        let idx = aggregate
            .position(request_id)
            .ok_or(HandoverError::RequestNotFound(request_id))?;

        // All guards first: nothing is written unless every one passes.
        if !aggregate.requests[idx].request.is_pending() {
            return Err(HandoverError::Conflict(format!(
                "request {} is no longer pending",
                request_id
            )));
        }
        if aggregate.item.status != ItemStatus::Available {
            return Err(HandoverError::Conflict(format!(
                "item {} is no longer available",
                aggregate.item.id
            )));
        }
        if aggregate.has_accepted() {
            return Err(HandoverError::Conflict(format!(
                "item {} already has an accepted request",
                aggregate.item.id
            )));
        }

        let decided_at = request.state.accepted_at;
        aggregate.item.status = ItemStatus::Reserved;
        aggregate.item.updated_at = decided_at;
        aggregate.requests[idx].request = AnyRequest::Accepted(request.clone());

        let mut auto_rejected = Vec::new();
        if policy == SiblingPolicy::AutoReject {
            for stored in aggregate.requests.iter_mut() {
                if let AnyRequest::Pending(sibling) = &stored.request {
                    let rejected = Request {
                        data: sibling.data.clone(),
                        state: Rejected {
                            rejected_at: decided_at,
                            reason: RejectionReason::SiblingAccepted,
                        },
                    };
                    stored.request = AnyRequest::Rejected(rejected.clone());
                    auto_rejected.push(rejected);
                }
            }
        }

        Ok((aggregate.item.clone(), auto_rejected))
    }

    async fn commit_rejection(&self, request: &Request<Rejected>) -> Result<()> {
        let request_id = request.data.id;
        let aggregate = self.aggregate(request.data.item_id)?;
        let mut aggregate = aggregate.lock();

        let idx = aggregate
            .position(request_id)
            .ok_or(HandoverError::RequestNotFound(request_id))?;
        if !aggregate.requests[idx].request.is_pending() {
            return Err(HandoverError::Conflict(format!(
                "request {} is no longer pending",
                request_id
            )));
        }

        aggregate.requests[idx].request = AnyRequest::Rejected(request.clone());
        Ok(())
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        // The request (and through it the item) must still exist.
        self.aggregate_for_request(message.request_id)?;

        let mut log = self.messages.entry(message.request_id).or_default();
        // Id and timestamp are taken under the entry lock so they are
        // monotonic within the request; a wall clock step backwards is
        // clamped to the previous message.
        let id = MessageId(self.message_sequence.fetch_add(1, Ordering::Relaxed) + 1);
        let now = Utc::now();
        let created_at = match log.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        let stored = Message {
            id,
            request_id: message.request_id,
            sender_id: message.sender_id,
            body: message.body,
            created_at,
        };
        log.push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, request_id: RequestId) -> Result<Vec<Message>> {
        let mut messages = self
            .messages
            .get(&request_id)
            .map(|log| log.value().clone())
            .unwrap_or_default();
        messages.sort_by(channel_order);
        Ok(messages)
    }
}
