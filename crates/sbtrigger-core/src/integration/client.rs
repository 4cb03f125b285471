//! Broker client abstractions.
//!
//! The listener and provider layers only ever talk to the broker through these
//! traits. A [`ServiceBusTransport`] is the factory that produces them; client
//! construction must be cheap and must not open a network connection (that
//! happens on first use).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::foundation::entity::EntityPath;
use crate::foundation::error::TransportResult;
use crate::foundation::message::ServiceBusMessage;

// =============================================================================
// Receivers
// =============================================================================

/// Receives and settles messages from one entity.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Path of the entity this receiver reads from.
    fn entity_path(&self) -> &str;

    /// Number of messages buffered ahead of consumption.
    fn prefetch_count(&self) -> u32;

    /// Receives up to `max_messages`, waiting at most `max_wait` for the first.
    ///
    /// Returns an empty batch when nothing arrives in time.
    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> TransportResult<Vec<ServiceBusMessage>>;

    /// Completes (removes) a locked message.
    async fn complete(&self, lock_token: &str) -> TransportResult<()>;

    /// Releases the lock so the message can be redelivered.
    async fn abandon(&self, lock_token: &str) -> TransportResult<()>;

    /// Moves a locked message to the dead-letter sub-queue.
    async fn dead_letter(&self, lock_token: &str, reason: Option<&str>) -> TransportResult<()>;

    /// Closes the receiver. Further operations fail.
    async fn close(&self) -> TransportResult<()>;

    fn is_closed(&self) -> bool;
}

/// A receiver bound to one locked session.
#[async_trait]
pub trait MessageSession: MessageReceiver {
    /// Identifier of the locked session.
    fn session_id(&self) -> &str;

    /// Reads the opaque session state.
    async fn get_state(&self) -> TransportResult<Option<Vec<u8>>>;

    /// Replaces the opaque session state.
    async fn set_state(&self, state: Option<Vec<u8>>) -> TransportResult<()>;
}

// =============================================================================
// Senders and entity clients
// =============================================================================

/// Sends messages to one entity.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn entity_path(&self) -> &str;

    async fn send(&self, message: ServiceBusMessage) -> TransportResult<()>;

    async fn send_batch(&self, messages: Vec<ServiceBusMessage>) -> TransportResult<()> {
        for message in messages {
            self.send(message).await?;
        }
        Ok(())
    }

    async fn close(&self) -> TransportResult<()>;
}

/// A queue or subscription client, used to accept sessions.
#[async_trait]
pub trait EntityClient: Send + Sync {
    /// Parsed entity this client addresses.
    fn entity(&self) -> &EntityPath;

    /// Prefetch count applied to sessions accepted through this client.
    fn prefetch_count(&self) -> u32;

    /// Locks the next available session.
    ///
    /// Returns `Ok(None)` when no session becomes available within `max_wait`.
    async fn accept_session(
        &self,
        max_wait: Duration,
    ) -> TransportResult<Option<Arc<dyn MessageSession>>>;

    async fn close(&self) -> TransportResult<()>;
}

// =============================================================================
// Transport factory
// =============================================================================

/// Produces broker clients for a connection.
///
/// Implementations validate their inputs eagerly (a malformed connection string
/// fails here) but defer network work to first use.
pub trait ServiceBusTransport: Send + Sync {
    /// Transport name, for logging.
    fn name(&self) -> &str;

    fn create_receiver(
        &self,
        connection: &str,
        entity_path: &str,
        prefetch_count: u32,
    ) -> TransportResult<Arc<dyn MessageReceiver>>;

    fn create_sender(
        &self,
        connection: &str,
        entity_path: &str,
    ) -> TransportResult<Arc<dyn MessageSender>>;

    fn create_queue_client(
        &self,
        connection: &str,
        queue: &str,
        prefetch_count: u32,
    ) -> TransportResult<Arc<dyn EntityClient>>;

    fn create_subscription_client(
        &self,
        connection: &str,
        topic: &str,
        subscription: &str,
        prefetch_count: u32,
    ) -> TransportResult<Arc<dyn EntityClient>>;
}

/// Shared transport handle.
pub type BoxedTransport = Arc<dyn ServiceBusTransport>;
