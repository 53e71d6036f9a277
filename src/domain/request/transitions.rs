//! State transitions for claims using the typestate pattern.
//!
//! Each request state is represented as a distinct type parameter on
//! `Request<State>`, so only a pending request can be decided:
//!
//! ```text
//! Request<Pending> ──accept()──> Request<Accepted>   (item available -> reserved, same atomic unit)
//!        │
//!        └─────────reject()──> Request<Rejected>
//! ```
//!
//! # Acceptance
//!
//! Accepting writes two records at once. The storage backend performs the
//! request `pending -> accepted` and item `available -> reserved` updates as a
//! single conditional write and fails with `Conflict` when either precondition
//! no longer holds, so two concurrent acceptances on one item cannot both win.
//!
//! Under [`SiblingPolicy::AutoReject`] every other pending request on the item
//! is rejected in that same unit with [`RejectionReason::SiblingAccepted`].
//! Under [`SiblingPolicy::LeavePending`] they stay pending and simply cannot
//! be accepted while the item is not available.
//!
//! # Rejection
//!
//! Rejecting never touches the item.

use metrics::counter;

use crate::config::SiblingPolicy;
use crate::domain::item::Item;
use crate::error::Result;
use crate::manager::Storage;

use super::types::{Accepted, Pending, Rejected, RejectionReason, Request};

/// Everything that changed when a request was accepted.
#[derive(Debug, Clone)]
pub struct Acceptance {
    pub request: Request<Accepted>,
    /// The item, now reserved
    pub item: Item,
    /// Siblings rejected in the same unit (empty under `LeavePending`)
    pub auto_rejected: Vec<Request<Rejected>>,
}

impl Request<Pending> {
    pub async fn accept<S: Storage + ?Sized>(
        self,
        policy: SiblingPolicy,
        storage: &S,
    ) -> Result<Acceptance> {
        let request = Request {
            data: self.data,
            state: Accepted {
                accepted_at: chrono::Utc::now(),
            },
        };
        let (item, auto_rejected) = storage.commit_acceptance(&request, policy).await?;

        counter!("handover_requests_total", "status" => "accepted").increment(1);
        if !auto_rejected.is_empty() {
            counter!("handover_requests_total", "status" => "rejected")
                .increment(auto_rejected.len() as u64);
        }
        tracing::info!(
            request_id = %request.data.id,
            item_id = %item.id,
            auto_rejected = auto_rejected.len(),
            "Request accepted, item reserved"
        );

        Ok(Acceptance {
            request,
            item,
            auto_rejected,
        })
    }

    pub async fn reject<S: Storage + ?Sized>(
        self,
        reason: RejectionReason,
        storage: &S,
    ) -> Result<Request<Rejected>> {
        let request = Request {
            data: self.data,
            state: Rejected {
                rejected_at: chrono::Utc::now(),
                reason,
            },
        };
        storage.commit_rejection(&request).await?;

        counter!("handover_requests_total", "status" => "rejected").increment(1);
        tracing::info!(
            request_id = %request.data.id,
            item_id = %request.data.item_id,
            reason = reason.as_str(),
            "Request rejected"
        );
        Ok(request)
    }
}
