//! Message processors: the settle-after-invoke policy applied by listeners.
//!
//! A processor decides whether a received message should be handed to the
//! function at all, and how it is settled afterwards:
//!
//! | invocation | `auto_complete` | action   |
//! |------------|-----------------|----------|
//! | failed     | any             | abandon  |
//! | succeeded  | `true`          | complete |
//! | succeeded  | `false`         | none     |
//!
//! Messages without a lock token are never settled.

use std::sync::Arc;

use tracing::{debug, warn};

use sbtrigger_core::{
    EntityClient, MessageHandlerOptions, MessageMetadata, MessageReceiver, MessageSession,
    ServiceBusMessage, SessionHandlerOptions, TransportResult,
};

use crate::context::FunctionResult;

/// Settle policy for the non-session pump.
pub struct MessageProcessor {
    receiver: Arc<dyn MessageReceiver>,
    options: MessageHandlerOptions,
}

impl MessageProcessor {
    pub fn new(receiver: Arc<dyn MessageReceiver>, options: MessageHandlerOptions) -> Self {
        Self { receiver, options }
    }

    pub fn receiver(&self) -> &Arc<dyn MessageReceiver> {
        &self.receiver
    }

    pub fn options(&self) -> &MessageHandlerOptions {
        &self.options
    }

    /// Whether `message` should be dispatched.
    pub fn begin_processing(&self, message: &ServiceBusMessage) -> bool {
        if self.receiver.is_closed() {
            debug!(
                entity_path = %self.receiver.entity_path(),
                message_id = ?message.message_id,
                "Receiver closed, skipping message"
            );
            return false;
        }
        true
    }

    /// Settles `message` according to `result`.
    pub async fn complete_processing(
        &self,
        message: &ServiceBusMessage,
        result: &FunctionResult,
    ) -> TransportResult<()> {
        settle(
            self.receiver.as_ref(),
            message,
            result,
            self.options.auto_complete,
        )
        .await
    }

    /// Settles every message of a batch according to one result.
    pub async fn complete_batch(
        &self,
        messages: &[ServiceBusMessage],
        result: &FunctionResult,
        auto_complete: bool,
    ) -> TransportResult<()> {
        for message in messages {
            settle(self.receiver.as_ref(), message, result, auto_complete).await?;
        }
        Ok(())
    }
}

/// Settle policy for session pumps.
pub struct SessionMessageProcessor {
    client: Arc<dyn EntityClient>,
    options: SessionHandlerOptions,
}

impl SessionMessageProcessor {
    pub fn new(client: Arc<dyn EntityClient>, options: SessionHandlerOptions) -> Self {
        Self { client, options }
    }

    pub fn client(&self) -> &Arc<dyn EntityClient> {
        &self.client
    }

    pub fn options(&self) -> &SessionHandlerOptions {
        &self.options
    }

    pub fn begin_processing(
        &self,
        session: &dyn MessageSession,
        _message: &ServiceBusMessage,
    ) -> bool {
        !session.is_closed()
    }

    pub async fn complete_processing(
        &self,
        session: &dyn MessageSession,
        message: &ServiceBusMessage,
        result: &FunctionResult,
    ) -> TransportResult<()> {
        settle(session, message, result, self.options.auto_complete).await
    }

    /// Settles a batch received through `session`.
    pub async fn complete_batch(
        &self,
        session: &dyn MessageSession,
        messages: &[ServiceBusMessage],
        result: &FunctionResult,
        auto_complete: bool,
    ) -> TransportResult<()> {
        for message in messages {
            settle(session, message, result, auto_complete).await?;
        }
        Ok(())
    }
}

async fn settle<R>(
    receiver: &R,
    message: &ServiceBusMessage,
    result: &FunctionResult,
    auto_complete: bool,
) -> TransportResult<()>
where
    R: MessageReceiver + ?Sized,
{
    let Ok(lock_token) = message.lock_token() else {
        return Ok(());
    };

    if !result.succeeded {
        warn!(
            entity_path = %receiver.entity_path(),
            lock_token = %lock_token,
            error = ?result.error,
            "Invocation failed, abandoning message"
        );
        return receiver.abandon(&lock_token).await;
    }
    if auto_complete {
        receiver.complete(&lock_token).await?;
    }
    Ok(())
}
