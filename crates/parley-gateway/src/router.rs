use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use parley_types::api::DeleteScope;
use parley_types::events::{ClientFrame, ServerFrame};
use parley_types::models::{ChatMessage, FlagUpdate, NewMessage};
use parley_types::{MessageId, UserId};

use crate::hub::Hub;
use crate::store::{MessageStore, StoreError, UserDirectory};

/// Why a send request produced an `error` frame instead of a message. The
/// `Display` text is what the sender sees.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Message content cannot be empty")]
    EmptyContent,

    #[error("Invalid receiver")]
    MissingReceiver,

    #[error("Cannot send a message to yourself")]
    SelfMessage,

    #[error("Receiver not found")]
    UnknownReceiver,

    #[error("Message being replied to was not found")]
    ReplyNotFound,

    #[error("Message being replied to is not part of this conversation")]
    ReplyOutsideConversation,

    #[error("Cannot reply to a deleted message")]
    ReplyDeleted,

    #[error("Failed to send message")]
    Persistence(#[from] StoreError),
}

/// Failures of read/delete flag changes.
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("message not found")]
    NotFound,

    #[error("not allowed to modify this message")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Turns inbound frames into stored messages and outbound envelopes.
///
/// Store calls run on the blocking pool but are awaited by the caller, so a
/// slow store stalls only the connection that issued the request.
#[derive(Clone)]
pub struct MessageRouter {
    hub: Hub,
    store: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
}

impl MessageRouter {
    pub fn new(hub: Hub, store: Arc<dyn MessageStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { hub, store, users }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Handle one decoded frame from `sender`. Never fails: rejected sends
    /// become an `error` frame to the sender, everything else is logged.
    pub async fn dispatch(&self, sender: UserId, frame: ClientFrame) {
        match frame {
            ClientFrame::SendMessage {
                receiver_id,
                content,
                reply_to_id,
            } => {
                let request = NewMessage {
                    sender_id: sender,
                    receiver_id,
                    content,
                    reply_to_id,
                };
                if let Err(e) = self.send_message(request).await {
                    match &e {
                        SendError::Persistence(source) => error!(sender, "message not stored: {}", source),
                        _ => warn!(sender, receiver_id, "send rejected: {}", e),
                    }
                    self.hub.deliver_to_user(sender, &ServerFrame::error(e.to_string()));
                }
            }

            ClientFrame::Typing { receiver_id } => {
                self.forward_signal(sender, receiver_id, ServerFrame::Typing { user_id: sender });
            }

            ClientFrame::StopTyping { receiver_id } => {
                self.forward_signal(sender, receiver_id, ServerFrame::StopTyping { user_id: sender });
            }

            ClientFrame::Unknown => {
                warn!(sender, "unknown frame type ignored");
            }
        }
    }

    /// Validate, persist, then deliver `new_message` to both parties.
    /// Nothing is delivered unless the store accepted the message.
    pub async fn send_message(&self, request: NewMessage) -> Result<ChatMessage, SendError> {
        self.validate(&request).await?;

        let store = self.store.clone();
        let message = blocking(move || store.create_message(&request).map_err(SendError::from)).await?;

        info!(
            id = message.id,
            from = message.sender_id,
            to = message.receiver_id,
            "message stored"
        );

        // Echo to the sender doubles as the send confirmation.
        self.hub.deliver_to_users(
            &[message.sender_id, message.receiver_id],
            &ServerFrame::NewMessage {
                message: message.clone(),
            },
        );

        Ok(message)
    }

    /// Mark a message read on behalf of its receiver.
    pub async fn mark_read(&self, reader: UserId, message_id: MessageId) -> Result<ChatMessage, FlagError> {
        let store = self.store.clone();
        blocking(move || {
            let message = store.get_message(message_id)?.ok_or(FlagError::NotFound)?;
            if message.receiver_id != reader {
                return Err(FlagError::Forbidden);
            }
            store
                .update_message_flags(message_id, FlagUpdate::mark_read())?
                .ok_or(FlagError::NotFound)
        })
        .await
    }

    /// Soft-delete a message. `Me` hides it from `actor` only; `All` is
    /// reserved for the sender, hides it from both sides at once and tells
    /// both clients.
    pub async fn delete_message(
        &self,
        actor: UserId,
        message_id: MessageId,
        scope: DeleteScope,
    ) -> Result<ChatMessage, FlagError> {
        let store = self.store.clone();
        let message = blocking(move || {
            let message = store
                .get_message(message_id)?
                .filter(|m| !m.is_deleted_for(actor))
                .ok_or(FlagError::NotFound)?;

            if message.sender_id != actor && message.receiver_id != actor {
                return Err(FlagError::Forbidden);
            }

            let flags = match scope {
                DeleteScope::Me => FlagUpdate::delete_for(&message, actor),
                DeleteScope::All if message.sender_id == actor => FlagUpdate::delete_for_everyone(),
                DeleteScope::All => return Err(FlagError::Forbidden),
            };

            store
                .update_message_flags(message_id, flags)?
                .ok_or(FlagError::NotFound)
        })
        .await?;

        if scope == DeleteScope::All {
            self.hub.deliver_to_users(
                &[message.sender_id, message.receiver_id],
                &ServerFrame::MessageDeleted { message_id },
            );
        }

        Ok(message)
    }

    async fn validate(&self, request: &NewMessage) -> Result<(), SendError> {
        if request.content.trim().is_empty() {
            return Err(SendError::EmptyContent);
        }
        if request.receiver_id == 0 {
            return Err(SendError::MissingReceiver);
        }
        if request.receiver_id == request.sender_id {
            return Err(SendError::SelfMessage);
        }

        let users = self.users.clone();
        let store = self.store.clone();
        let (sender, receiver, reply_to_id) = (request.sender_id, request.receiver_id, request.reply_to_id);

        blocking(move || {
            if users.get_user(receiver)?.is_none() {
                return Err(SendError::UnknownReceiver);
            }

            let Some(reply_to_id) = reply_to_id else {
                return Ok(());
            };

            let target = store.get_message(reply_to_id)?.ok_or(SendError::ReplyNotFound)?;
            if !target.is_between(sender, receiver) {
                return Err(SendError::ReplyOutsideConversation);
            }
            if target.is_deleted_for(sender) {
                return Err(SendError::ReplyDeleted);
            }
            Ok(())
        })
        .await
    }

    fn forward_signal(&self, sender: UserId, receiver_id: UserId, frame: ServerFrame) {
        if receiver_id == 0 || receiver_id == sender {
            debug!(sender, receiver_id, "{} signal dropped", frame.kind());
            return;
        }
        self.hub.deliver_to_user(receiver_id, &frame);
    }
}

/// Run a store call on the blocking pool and flatten the join error into the
/// caller's error type.
async fn blocking<T, E, F>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Backend(anyhow::anyhow!("store task failed: {}", e)).into()),
    }
}
