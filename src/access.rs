//! Access gate: who may act on an item or a request.
//!
//! Predicates are pure. The `ensure_*` helpers turn a failed check into
//! [`HandoverError::Forbidden`].

use crate::domain::item::{Item, UserId};
use crate::domain::request::RequestData;
use crate::error::{HandoverError, Result};

/// What a caller wants to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    /// Accept or reject it: item owner only.
    Decide,
    /// Read it, or read and post messages on it: owner or requester.
    Converse,
}

impl RequestAction {
    fn describe(self) -> &'static str {
        match self {
            RequestAction::Decide => "decide on this request",
            RequestAction::Converse => "take part in this request",
        }
    }
}

/// Owner-only check for item mutations.
pub fn can_act_on_item(user: UserId, item: &Item) -> bool {
    item.is_owned_by(user)
}

/// Participant check for a request, scoped by action.
pub fn can_act_on_request(
    user: UserId,
    request: &RequestData,
    item: &Item,
    action: RequestAction,
) -> bool {
    match action {
        RequestAction::Decide => item.is_owned_by(user),
        RequestAction::Converse => item.is_owned_by(user) || request.requester_id == user,
    }
}

pub fn ensure_item_owner(user: UserId, item: &Item, action: &'static str) -> Result<()> {
    if can_act_on_item(user, item) {
        Ok(())
    } else {
        tracing::warn!(user = %user, item_id = %item.id, action, "Denied non-owner item action");
        Err(HandoverError::Forbidden { user, action })
    }
}

pub fn ensure_request_access(
    user: UserId,
    request: &RequestData,
    item: &Item,
    action: RequestAction,
) -> Result<()> {
    if can_act_on_request(user, request, item, action) {
        Ok(())
    } else {
        tracing::warn!(
            user = %user,
            request_id = %request.id,
            ?action,
            "Denied request action"
        );
        Err(HandoverError::Forbidden {
            user,
            action: action.describe(),
        })
    }
}
