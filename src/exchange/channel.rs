//! Message channel: the chat log between an owner and a requester.
//!
//! There is no push delivery and no cursor. Readers poll
//! [`Exchange::list_messages`] and get the full, stably ordered history each
//! time.

use metrics::counter;

use super::Exchange;
use crate::access::{RequestAction, ensure_request_access};
use crate::domain::item::UserId;
use crate::domain::message::{Message, NewMessage};
use crate::domain::request::{RequestId, RequestStatus};
use crate::error::{HandoverError, Result};
use crate::manager::Storage;

impl<S: Storage> Exchange<S> {
    /// Append a message to a request's channel.
    ///
    /// The body is stored as given; it only has to contain something other
    /// than whitespace.
    ///
    /// # Errors
    /// - `RequestNotFound` / `ItemNotFound`
    /// - `Forbidden` unless `sender` is the requester or the item owner
    /// - `Validation` if the text is blank or too long
    /// - `InvalidState` if the request was rejected and posting on rejected
    ///   requests is disabled
    #[tracing::instrument(skip_all, fields(request_id = %request_id, sender = %sender))]
    pub async fn post_message(
        &self,
        request_id: RequestId,
        sender: UserId,
        text: &str,
    ) -> Result<Message> {
        let (request, item) = self.load_request(request_id).await?;
        ensure_request_access(sender, request.data(), &item, RequestAction::Converse)?;

        if text.trim().is_empty() {
            return Err(HandoverError::Validation(
                "message must not be empty".to_string(),
            ));
        }
        if text.chars().count() > self.config.max_text_len {
            return Err(HandoverError::Validation(format!(
                "message exceeds {} character limit",
                self.config.max_text_len
            )));
        }
        if request.status() == RequestStatus::Rejected && !self.config.allow_messages_on_rejected {
            return Err(HandoverError::InvalidState(format!(
                "request {} was rejected and its channel is closed",
                request_id
            )));
        }

        let message = self
            .storage
            .append_message(NewMessage {
                request_id,
                sender_id: sender,
                body: text.to_string(),
            })
            .await?;

        counter!("handover_messages_total").increment(1);
        tracing::debug!(message_id = %message.id, "Message posted");
        Ok(message)
    }

    /// Full history of a request's channel, oldest first.
    ///
    /// Equal timestamps keep insertion order.
    #[tracing::instrument(skip_all, fields(request_id = %request_id, caller = %caller))]
    pub async fn list_messages(&self, request_id: RequestId, caller: UserId) -> Result<Vec<Message>> {
        let (request, item) = self.load_request(request_id).await?;
        ensure_request_access(caller, request.data(), &item, RequestAction::Converse)?;
        self.storage.list_messages(request_id).await
    }
}
