//! Exchange coordination: deciding requests and completing hand-overs.
//!
//! Accepting a request is the one place where a request change and an item
//! change must happen together. The guards below run against a fresh read so
//! callers get a precise error; the storage backend then repeats them inside
//! its conditional write, and a caller that loses a race gets `Conflict`.

use metrics::counter;

use super::{Exchange, note_conflict};
use crate::access::{RequestAction, ensure_item_owner, ensure_request_access};
use crate::domain::item::{Item, ItemId, ItemStatus, UserId};
use crate::domain::request::{
    Acceptance, AnyRequest, Pending, RejectionReason, Rejected, Request, RequestId,
};
use crate::error::{HandoverError, Result};
use crate::manager::Storage;

impl<S: Storage> Exchange<S> {
    /// Accept a pending request and reserve its item in one unit.
    ///
    /// # Errors
    /// - `RequestNotFound` / `ItemNotFound`
    /// - `Forbidden` unless `acting_user` owns the item
    /// - `InvalidState` if the request is decided or the item is not `available`
    /// - `Conflict` if another acceptance on the same item won the race
    #[tracing::instrument(skip_all, fields(request_id = %request_id, acting_user = %acting_user))]
    pub async fn accept_request(
        &self,
        request_id: RequestId,
        acting_user: UserId,
    ) -> Result<Acceptance> {
        let (request, item) = self.load_request(request_id).await?;
        ensure_request_access(acting_user, request.data(), &item, RequestAction::Decide)?;
        let pending = require_pending(request)?;
        self.accept_pending(pending, &item).await
    }

    /// Shared by [`Exchange::accept_request`] and
    /// [`Exchange::set_request_status`]; access is already checked.
    pub(super) async fn accept_pending(
        &self,
        pending: Request<Pending>,
        item: &Item,
    ) -> Result<Acceptance> {
        if item.status != ItemStatus::Available {
            return Err(HandoverError::InvalidState(format!(
                "item {} is '{}', only available items can be reserved",
                item.id, item.status
            )));
        }

        pending
            .accept(self.config.sibling_policy, self.storage.as_ref())
            .await
            .inspect_err(note_conflict("accept_request"))
    }

    /// Reject a pending request. The item is left untouched.
    ///
    /// # Errors
    /// - `RequestNotFound` / `ItemNotFound`
    /// - `Forbidden` unless `acting_user` owns the item
    /// - `InvalidState` if the request was already decided
    /// - `Conflict` if a concurrent decision won
    #[tracing::instrument(skip_all, fields(request_id = %request_id, acting_user = %acting_user))]
    pub async fn reject_request(
        &self,
        request_id: RequestId,
        acting_user: UserId,
    ) -> Result<Request<Rejected>> {
        let (request, item) = self.load_request(request_id).await?;
        ensure_request_access(acting_user, request.data(), &item, RequestAction::Decide)?;
        let pending = require_pending(request)?;

        pending
            .reject(RejectionReason::Owner, self.storage.as_ref())
            .await
            .inspect_err(note_conflict("reject_request"))
    }

    /// Mark an item as handed over. Works from `available` or `reserved`.
    ///
    /// Requests are left as they are: an accepted request stays accepted and
    /// its message channel keeps working.
    ///
    /// # Errors
    /// - `ItemNotFound`
    /// - `Forbidden` unless `acting_user` owns the item
    /// - `InvalidState` if the item is already given
    /// - `Conflict` if the status changed concurrently
    #[tracing::instrument(skip_all, fields(item_id = %item_id, acting_user = %acting_user))]
    pub async fn complete_exchange(&self, item_id: ItemId, acting_user: UserId) -> Result<Item> {
        let item = self.storage.get_item(item_id).await?;
        ensure_item_owner(acting_user, &item, "complete the exchange")?;

        if !item.status.can_transition_to(ItemStatus::Given) {
            return Err(HandoverError::InvalidState(format!(
                "item {} is already '{}'",
                item_id, item.status
            )));
        }

        let given = self
            .storage
            .compare_and_set_item_status(item_id, item.status, ItemStatus::Given)
            .await
            .inspect_err(note_conflict("complete_exchange"))?;

        counter!("handover_items_total", "status" => "given").increment(1);
        tracing::info!(from = %item.status, "Exchange completed");
        Ok(given)
    }
}

fn require_pending(request: AnyRequest) -> Result<Request<Pending>> {
    let id = request.id();
    let status = request.status();
    request.into_pending().ok_or_else(|| {
        HandoverError::InvalidState(format!("request {} is already '{}'", id, status))
    })
}
