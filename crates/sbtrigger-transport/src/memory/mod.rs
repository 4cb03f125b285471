//! In-process broker.
//!
//! [`InMemoryTransport`] implements [`ServiceBusTransport`] over process-local
//! queues, topics and subscriptions. Namespaces are keyed by the `Endpoint` of
//! the connection string, so two connection strings with the same endpoint
//! share entities.
//!
//! The broker keeps the semantics the trigger layer depends on: sequence
//! numbers, peek-lock with lock tokens, delivery counts, abandon and
//! redelivery, dead-lettering (including max delivery count), prefetch and
//! exclusive session locks.
//!
//! ```rust,ignore
//! let transport = InMemoryTransport::new();
//! transport.create_queue(CONN, "orders", EntityOptions::default())?;
//!
//! let sender = transport.create_sender(CONN, "orders")?;
//! sender.send(ServiceBusMessage::from_text("hello")).await?;
//! ```

mod clients;
mod namespace;
mod store;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use sbtrigger_core::{
    ConnectionString, EntityClient, EntityPath, MessageReceiver, MessageSender,
    ServiceBusMessage, ServiceBusTransport, TransportResult,
};

pub use clients::{InMemoryEntityClient, InMemoryReceiver, InMemorySender, InMemorySession};
pub use store::EntityOptions;

use namespace::Namespace;

/// Process-local broker.
#[derive(Default)]
pub struct InMemoryTransport {
    namespaces: Mutex<HashMap<String, Arc<Namespace>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the namespace for a connection string, creating it if needed.
    fn namespace(&self, connection: &str) -> TransportResult<Arc<Namespace>> {
        let parsed = ConnectionString::parse(connection)?;
        let mut namespaces = self.namespaces.lock();
        let namespace = namespaces
            .entry(parsed.endpoint().to_string())
            .or_insert_with(|| {
                debug!(endpoint = %parsed.endpoint(), "Namespace created");
                Arc::new(Namespace::new(parsed.endpoint()))
            });
        Ok(namespace.clone())
    }

    // ─── Administration ───────────────────────────────────────────────────────

    /// Creates a queue. Existing queues are left untouched.
    pub fn create_queue(
        &self,
        connection: &str,
        name: &str,
        options: EntityOptions,
    ) -> TransportResult<()> {
        self.namespace(connection)?.create_queue(name, options);
        Ok(())
    }

    /// Creates a topic. Existing topics are left untouched.
    pub fn create_topic(&self, connection: &str, name: &str) -> TransportResult<()> {
        self.namespace(connection)?.create_topic(name);
        Ok(())
    }

    /// Creates a subscription on an existing topic.
    pub fn create_subscription(
        &self,
        connection: &str,
        topic: &str,
        subscription: &str,
        options: EntityOptions,
    ) -> TransportResult<()> {
        self.namespace(connection)?
            .create_subscription(topic, subscription, options)
    }

    // ─── Inspection ───────────────────────────────────────────────────────────

    /// Messages waiting to be received on `entity_path`.
    pub fn active_message_count(
        &self,
        connection: &str,
        entity_path: &str,
    ) -> TransportResult<usize> {
        Ok(self.namespace(connection)?.resolve(entity_path)?.active_count())
    }

    /// Messages currently locked by a receiver on `entity_path`.
    pub fn locked_message_count(
        &self,
        connection: &str,
        entity_path: &str,
    ) -> TransportResult<usize> {
        Ok(self.namespace(connection)?.resolve(entity_path)?.locked_count())
    }

    /// Copies of the messages waiting on `entity_path`, in delivery order.
    pub fn peek(
        &self,
        connection: &str,
        entity_path: &str,
    ) -> TransportResult<Vec<ServiceBusMessage>> {
        Ok(self.namespace(connection)?.resolve(entity_path)?.peek_active())
    }
}

impl ServiceBusTransport for InMemoryTransport {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn create_receiver(
        &self,
        connection: &str,
        entity_path: &str,
        prefetch_count: u32,
    ) -> TransportResult<Arc<dyn MessageReceiver>> {
        let namespace = self.namespace(connection)?;
        debug!(
            endpoint = %namespace.endpoint(),
            entity_path = %entity_path,
            prefetch_count,
            "Creating receiver"
        );
        Ok(Arc::new(InMemoryReceiver::new(namespace, entity_path, prefetch_count)))
    }

    fn create_sender(
        &self,
        connection: &str,
        entity_path: &str,
    ) -> TransportResult<Arc<dyn MessageSender>> {
        let namespace = self.namespace(connection)?;
        Ok(Arc::new(InMemorySender::new(namespace, entity_path)))
    }

    fn create_queue_client(
        &self,
        connection: &str,
        queue: &str,
        prefetch_count: u32,
    ) -> TransportResult<Arc<dyn EntityClient>> {
        let namespace = self.namespace(connection)?;
        Ok(Arc::new(InMemoryEntityClient::new(
            namespace,
            EntityPath::Queue(queue.to_string()),
            prefetch_count,
        )))
    }

    fn create_subscription_client(
        &self,
        connection: &str,
        topic: &str,
        subscription: &str,
        prefetch_count: u32,
    ) -> TransportResult<Arc<dyn EntityClient>> {
        let namespace = self.namespace(connection)?;
        Ok(Arc::new(InMemoryEntityClient::new(
            namespace,
            EntityPath::Subscription {
                topic: topic.to_string(),
                subscription: subscription.to_string(),
            },
            prefetch_count,
        )))
    }
}
