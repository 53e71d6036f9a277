//! Request store operations.

use chrono::Utc;
use metrics::counter;
use uuid::Uuid;

use super::{Exchange, bounded_text, note_conflict};
use crate::access::{RequestAction, ensure_request_access};
use crate::domain::item::{ItemId, ItemStatus, UserId};
use crate::domain::request::{
    AnyRequest, Pending, RejectionReason, Request, RequestData, RequestId, RequestStatus,
};
use crate::error::{HandoverError, Result};
use crate::manager::Storage;

impl<S: Storage> Exchange<S> {
    /// Claim an item on behalf of `requester`.
    ///
    /// # Errors
    /// - `ItemNotFound` if the item does not exist
    /// - `Forbidden` if `requester` owns the item
    /// - `InvalidState` unless the item is `available`
    /// - `Validation` if the note is too long
    #[tracing::instrument(skip_all, fields(item_id = %item_id, requester = %requester))]
    pub async fn create_request(
        &self,
        item_id: ItemId,
        requester: UserId,
        message: &str,
    ) -> Result<Request<Pending>> {
        let item = self.storage.get_item(item_id).await?;

        if item.is_owned_by(requester) {
            tracing::warn!("Owner tried to claim their own item");
            return Err(HandoverError::Forbidden {
                user: requester,
                action: "request their own item",
            });
        }
        if item.status != ItemStatus::Available {
            return Err(HandoverError::InvalidState(format!(
                "item {} is '{}', requests need it 'available'",
                item_id, item.status
            )));
        }
        let message = bounded_text("message", message, self.config.max_text_len)?;

        let request = Request {
            data: RequestData {
                id: RequestId(Uuid::new_v4()),
                item_id,
                requester_id: requester,
                message,
                created_at: Utc::now(),
            },
            state: Pending {},
        };
        // Availability is re-checked atomically at insert time.
        self.storage
            .insert_request(&request)
            .await
            .inspect_err(note_conflict("create_request"))?;

        counter!("handover_requests_total", "status" => "pending").increment(1);
        tracing::info!(request_id = %request.data.id, "Request created");
        Ok(request)
    }

    /// All requests on an item in queue order (oldest first).
    #[tracing::instrument(skip_all, fields(item_id = %item_id))]
    pub async fn get_requests_for_item(&self, item_id: ItemId) -> Result<Vec<AnyRequest>> {
        let requests = self.storage.list_requests_for_item(item_id).await?;
        tracing::debug!(count = requests.len(), "Listed requests for item");
        Ok(requests)
    }

    /// A single request, visible to its two participants.
    #[tracing::instrument(skip_all, fields(request_id = %request_id, caller = %caller))]
    pub async fn get_request(&self, request_id: RequestId, caller: UserId) -> Result<AnyRequest> {
        let (request, item) = self.load_request(request_id).await?;
        ensure_request_access(caller, request.data(), &item, RequestAction::Converse)?;
        Ok(request)
    }

    /// Requests made by `requester`, newest first.
    #[tracing::instrument(skip_all, fields(requester = %requester))]
    pub async fn list_requests_by_requester(&self, requester: UserId) -> Result<Vec<AnyRequest>> {
        self.storage.list_requests_by_requester(requester).await
    }

    /// Decide a request by target status.
    ///
    /// `accepted` goes through the same guarded path as
    /// [`Exchange::accept_request`], so the item is reserved in the same unit.
    ///
    /// # Errors
    /// - `RequestNotFound` / `ItemNotFound`
    /// - `Forbidden` unless `acting_user` owns the item
    /// - `InvalidTransition` unless the move is `pending -> accepted` or
    ///   `pending -> rejected`
    /// - `InvalidState` when accepting while the item is not `available`
    /// - `Conflict` if a concurrent decision won
    #[tracing::instrument(skip_all, fields(request_id = %request_id, acting_user = %acting_user, next = %next))]
    pub async fn set_request_status(
        &self,
        request_id: RequestId,
        next: RequestStatus,
        acting_user: UserId,
    ) -> Result<AnyRequest> {
        let (request, item) = self.load_request(request_id).await?;
        ensure_request_access(acting_user, request.data(), &item, RequestAction::Decide)?;

        let current = request.status();
        let invalid = || HandoverError::InvalidTransition {
            from: current.as_str().to_string(),
            to: next.as_str().to_string(),
        };
        if !current.can_transition_to(next) {
            return Err(invalid());
        }

        match (request, next) {
            (AnyRequest::Pending(pending), RequestStatus::Accepted) => {
                let acceptance = self.accept_pending(pending, &item).await?;
                Ok(acceptance.request.into())
            }
            (AnyRequest::Pending(pending), RequestStatus::Rejected) => {
                let rejected = pending
                    .reject(RejectionReason::Owner, self.storage.as_ref())
                    .await
                    .inspect_err(note_conflict("set_request_status"))?;
                Ok(rejected.into())
            }
            _ => Err(invalid()),
        }
    }
}
