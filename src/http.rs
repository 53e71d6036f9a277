//! HTTP boundary for the exchange engine.
//!
//! A thin axum router over [`Exchange`]. Handlers parse input, call one engine
//! operation and serialize its result; every rule lives in the engine.
//!
//! Caller identity is supplied by an upstream auth layer in the `x-user-id`
//! header (a UUID). This module trusts it as given.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::domain::item::{ItemFilter, ItemId, ItemStatus, NewItem, UserId};
use crate::domain::request::{AnyRequest, RequestId, RequestStatus};
use crate::error::{ErrorKind, HandoverError};
use crate::exchange::Exchange;
use crate::manager::Storage;

/// Header carrying the authenticated caller's user id.
pub const USER_HEADER: &str = "x-user-id";

/// Header advertising how often chat clients should re-fetch messages.
pub const POLL_INTERVAL_HEADER: &str = "x-poll-interval-ms";

/// Build the router for an engine instance.
pub fn router<S: Storage>(exchange: Exchange<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/items", get(list_items::<S>).post(create_item::<S>))
        .route("/items/:id", get(get_item::<S>))
        .route("/items/:id/status", patch(set_item_status::<S>))
        .route("/items/:id/requests", get(list_item_requests::<S>))
        .route("/items/:id/complete", post(complete_exchange::<S>))
        .route("/requests", get(list_my_requests::<S>).post(create_request::<S>))
        .route("/requests/:id", get(get_request::<S>))
        .route("/requests/:id/status", patch(set_request_status::<S>))
        .route(
            "/requests/:id/messages",
            get(list_messages::<S>).post(post_message::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(exchange)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
}

impl IntoResponse for HandoverError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidState | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if kind == ErrorKind::Internal {
            tracing::error!(error = %self, "Internal error while handling request");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorBody { error: kind, message })).into_response()
    }
}

/// Unwrap a JSON body, reporting malformed input as a validation error.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HandoverError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| HandoverError::Validation(rejection.body_text()))
}

// ============================================================================
// Caller identity
// ============================================================================

/// The authenticated user making the call.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub UserId);

#[axum::async_trait]
impl<St: Send + Sync> FromRequestParts<St> for Caller {
    type Rejection = HandoverError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| HandoverError::Validation(format!("missing {} header", USER_HEADER)))?;
        let id = raw
            .to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| {
                HandoverError::Validation(format!("{} must be a UUID", USER_HEADER))
            })?;
        Ok(Caller(UserId(id)))
    }
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
struct StatusChange<T> {
    status: T,
}

#[derive(Debug, Deserialize)]
struct CreateRequestBody {
    item_id: ItemId,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PostMessageBody {
    #[serde(alias = "body")]
    text: String,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "handover",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_items<S: Storage>(
    State(exchange): State<Exchange<S>>,
    filter: Result<Query<ItemFilter>, QueryRejection>,
) -> Result<Response, HandoverError> {
    let Query(filter) =
        filter.map_err(|rejection| HandoverError::Validation(rejection.body_text()))?;
    let items = exchange.list_items(&filter).await?;
    Ok(Json(items).into_response())
}

async fn create_item<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Caller(owner): Caller,
    payload: Result<Json<NewItem>, JsonRejection>,
) -> Result<Response, HandoverError> {
    let item = exchange.create_item(owner, json_body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(item)).into_response())
}

async fn get_item<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Path(item_id): Path<ItemId>,
) -> Result<Response, HandoverError> {
    let item = exchange.get_item(item_id).await?;
    Ok(Json(item).into_response())
}

async fn set_item_status<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Caller(acting_user): Caller,
    Path(item_id): Path<ItemId>,
    payload: Result<Json<StatusChange<ItemStatus>>, JsonRejection>,
) -> Result<Response, HandoverError> {
    let change = json_body(payload)?;
    let item = exchange
        .set_item_status(item_id, change.status, acting_user)
        .await?;
    Ok(Json(item).into_response())
}

async fn list_item_requests<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Path(item_id): Path<ItemId>,
) -> Result<Response, HandoverError> {
    let requests = exchange.get_requests_for_item(item_id).await?;
    Ok(Json(requests).into_response())
}

async fn complete_exchange<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Caller(acting_user): Caller,
    Path(item_id): Path<ItemId>,
) -> Result<Response, HandoverError> {
    let item = exchange.complete_exchange(item_id, acting_user).await?;
    Ok(Json(item).into_response())
}

async fn list_my_requests<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Caller(requester): Caller,
) -> Result<Response, HandoverError> {
    let requests = exchange.list_requests_by_requester(requester).await?;
    Ok(Json(requests).into_response())
}

async fn create_request<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Caller(requester): Caller,
    payload: Result<Json<CreateRequestBody>, JsonRejection>,
) -> Result<Response, HandoverError> {
    let body = json_body(payload)?;
    let request = exchange
        .create_request(body.item_id, requester, &body.message)
        .await?;
    Ok((StatusCode::CREATED, Json(AnyRequest::from(request))).into_response())
}

async fn get_request<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Caller(caller): Caller,
    Path(request_id): Path<RequestId>,
) -> Result<Response, HandoverError> {
    let request = exchange.get_request(request_id, caller).await?;
    Ok(Json(request).into_response())
}

async fn set_request_status<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Caller(acting_user): Caller,
    Path(request_id): Path<RequestId>,
    payload: Result<Json<StatusChange<RequestStatus>>, JsonRejection>,
) -> Result<Response, HandoverError> {
    let change = json_body(payload)?;
    let request = exchange
        .set_request_status(request_id, change.status, acting_user)
        .await?;
    Ok(Json(request).into_response())
}

async fn list_messages<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Caller(caller): Caller,
    Path(request_id): Path<RequestId>,
) -> Result<Response, HandoverError> {
    let messages = exchange.list_messages(request_id, caller).await?;
    let poll_interval = exchange.config().poll_interval_ms.to_string();
    Ok(([(POLL_INTERVAL_HEADER, poll_interval)], Json(messages)).into_response())
}

async fn post_message<S: Storage>(
    State(exchange): State<Exchange<S>>,
    Caller(sender): Caller,
    Path(request_id): Path<RequestId>,
    payload: Result<Json<PostMessageBody>, JsonRejection>,
) -> Result<Response, HandoverError> {
    let body = json_body(payload)?;
    let message = exchange.post_message(request_id, sender, &body.text).await?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (HandoverError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                HandoverError::RequestNotFound(RequestId(Uuid::new_v4())),
                StatusCode::NOT_FOUND,
            ),
            (
                HandoverError::Forbidden {
                    user: UserId(Uuid::new_v4()),
                    action: "accept",
                },
                StatusCode::FORBIDDEN,
            ),
            (HandoverError::InvalidState("x".into()), StatusCode::CONFLICT),
            (
                HandoverError::InvalidTransition {
                    from: "given".into(),
                    to: "available".into(),
                },
                StatusCode::CONFLICT,
            ),
            (HandoverError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                HandoverError::Other(anyhow::anyhow!("db down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
