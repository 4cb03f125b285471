//! Cached broker clients.
//!
//! [`MessagingProvider`] owns one cache per client kind (receivers, senders,
//! entity clients), keyed by [`ClientKey`]. An entry is created at most once
//! per key and reused for the life of the provider; there is no eviction.
//!
//! ```text
//! create_message_processor ──▶ receivers ─────┐
//! create_message_receiver ───▶ receivers      │
//! create_message_sender ─────▶ senders        ├──▶ ServiceBusTransport
//! create_client_entity ──────▶ client_entities│
//! create_session_message_processor ──▶ ───────┘
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use sbtrigger_core::{
    BoxedTransport, EntityClient, EntityPath, MessageReceiver, MessageSender, ServiceBusOptions,
};

use crate::error::{BindingError, BindingResult, require_non_empty};
use crate::processor::{MessageProcessor, SessionMessageProcessor};

/// Cache key: entity path and connection string, compared field by field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub entity_path: String,
    pub connection: String,
}

impl ClientKey {
    pub fn new(entity_path: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            entity_path: entity_path.into(),
            connection: connection.into(),
        }
    }
}

/// Creates and caches broker clients for triggers and output bindings.
pub struct MessagingProvider {
    options: Arc<ServiceBusOptions>,
    transport: BoxedTransport,
    receivers: DashMap<ClientKey, Arc<dyn MessageReceiver>>,
    senders: DashMap<ClientKey, Arc<dyn MessageSender>>,
    client_entities: DashMap<ClientKey, Arc<dyn EntityClient>>,
}

impl MessagingProvider {
    pub fn new(options: Arc<ServiceBusOptions>, transport: BoxedTransport) -> Self {
        Self {
            options,
            transport,
            receivers: DashMap::new(),
            senders: DashMap::new(),
            client_entities: DashMap::new(),
        }
    }

    pub fn options(&self) -> &Arc<ServiceBusOptions> {
        &self.options
    }

    pub fn transport(&self) -> &BoxedTransport {
        &self.transport
    }

    /// Processor over the cached receiver for `entity_path`.
    pub fn create_message_processor(
        &self,
        entity_path: &str,
        connection: &str,
    ) -> BindingResult<MessageProcessor> {
        let receiver = self.get_or_add_message_receiver(entity_path, connection)?;
        Ok(MessageProcessor::new(
            receiver,
            self.options.message_handler_options.clone(),
        ))
    }

    /// Cached receiver for `entity_path`.
    pub fn create_message_receiver(
        &self,
        entity_path: &str,
        connection: &str,
    ) -> BindingResult<Arc<dyn MessageReceiver>> {
        self.get_or_add_message_receiver(entity_path, connection)
    }

    /// Cached sender for `entity_path`.
    pub fn create_message_sender(
        &self,
        entity_path: &str,
        connection: &str,
    ) -> BindingResult<Arc<dyn MessageSender>> {
        validate(entity_path, connection)?;
        self.parse_entity_path(entity_path)?;
        get_or_try_insert(
            &self.senders,
            ClientKey::new(entity_path, connection),
            || {
                debug!(entity_path = %entity_path, "Creating message sender");
                Ok(self.transport.create_sender(connection, entity_path)?)
            },
        )
    }

    /// Cached queue or subscription client for `entity_path`.
    pub fn create_client_entity(
        &self,
        entity_path: &str,
        connection: &str,
    ) -> BindingResult<Arc<dyn EntityClient>> {
        validate(entity_path, connection)?;
        self.get_or_add_client_entity(entity_path, connection)
    }

    /// Session processor over the cached entity client for `entity_path`.
    pub fn create_session_message_processor(
        &self,
        entity_path: &str,
        connection: &str,
    ) -> BindingResult<SessionMessageProcessor> {
        validate(entity_path, connection)?;
        let client = self.get_or_add_client_entity(entity_path, connection)?;
        Ok(SessionMessageProcessor::new(
            client,
            self.options.session_handler_options.clone(),
        ))
    }

    /// Returns the cached receiver for the key, creating it with the
    /// configured prefetch count on first use.
    pub fn get_or_add_message_receiver(
        &self,
        entity_path: &str,
        connection: &str,
    ) -> BindingResult<Arc<dyn MessageReceiver>> {
        validate(entity_path, connection)?;
        self.parse_entity_path(entity_path)?;
        get_or_try_insert(
            &self.receivers,
            ClientKey::new(entity_path, connection),
            || {
                debug!(
                    entity_path = %entity_path,
                    prefetch_count = self.options.prefetch_count,
                    "Creating message receiver"
                );
                Ok(self.transport.create_receiver(
                    connection,
                    entity_path,
                    self.options.prefetch_count,
                )?)
            },
        )
    }

    fn get_or_add_client_entity(
        &self,
        entity_path: &str,
        connection: &str,
    ) -> BindingResult<Arc<dyn EntityClient>> {
        let parsed = self.parse_entity_path(entity_path)?;
        get_or_try_insert(
            &self.client_entities,
            ClientKey::new(entity_path, connection),
            || {
                let prefetch = self.options.prefetch_count;
                let client = match parsed {
                    EntityPath::Subscription {
                        topic,
                        subscription,
                    } => {
                        debug!(
                            topic = %topic,
                            subscription = %subscription,
                            "Creating subscription client"
                        );
                        self.transport.create_subscription_client(
                            connection,
                            &topic,
                            &subscription,
                            prefetch,
                        )?
                    }
                    EntityPath::Queue(queue) => {
                        debug!(queue = %queue, "Creating queue client");
                        self.transport.create_queue_client(connection, &queue, prefetch)?
                    }
                };
                Ok(client)
            },
        )
    }

    /// Parses `entity_path`, applying the multi-marker policy.
    fn parse_entity_path(&self, entity_path: &str) -> BindingResult<EntityPath> {
        match EntityPath::parse_strict(entity_path) {
            Ok(parsed) => Ok(parsed),
            Err(_) if self.options.strict_entity_paths => Err(BindingError::InvalidEntityPath {
                path: entity_path.to_string(),
                reason: "subscription marker appears more than once".into(),
            }),
            Err(_) => {
                warn!(
                    entity_path = %entity_path,
                    "Entity path has more than one subscription marker, treating it as a queue"
                );
                Ok(EntityPath::parse(entity_path))
            }
        }
    }

    /// Number of cached receivers, senders and entity clients.
    pub fn cached_counts(&self) -> (usize, usize, usize) {
        (
            self.receivers.len(),
            self.senders.len(),
            self.client_entities.len(),
        )
    }
}

fn validate(entity_path: &str, connection: &str) -> BindingResult<()> {
    require_non_empty(entity_path, "entity_path")?;
    require_non_empty(connection, "connection")
}

/// Atomic insert-if-absent: `create` runs at most once per key, and a failed
/// creation leaves the cache untouched.
fn get_or_try_insert<V: ?Sized>(
    cache: &DashMap<ClientKey, Arc<V>>,
    key: ClientKey,
    create: impl FnOnce() -> BindingResult<Arc<V>>,
) -> BindingResult<Arc<V>> {
    if let Some(existing) = cache.get(&key) {
        return Ok(existing.clone());
    }
    match cache.entry(key) {
        Entry::Occupied(entry) => Ok(entry.get().clone()),
        Entry::Vacant(entry) => {
            let created = create()?;
            entry.insert(created.clone());
            Ok(created)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sbtrigger_core::{ServiceBusTransport, TransportError, TransportResult};
    use sbtrigger_transport::InMemoryTransport;

    use super::*;

    const CONN: &str = "Endpoint=sb://provider.test/;SharedAccessKeyName=k;SharedAccessKey=v";
    const OTHER_CONN: &str = "Endpoint=sb://other.test/;SharedAccessKeyName=k;SharedAccessKey=v";

    /// Counts factory calls on top of the in-memory broker.
    #[derive(Default)]
    struct CountingTransport {
        inner: InMemoryTransport,
        receivers: AtomicUsize,
        senders: AtomicUsize,
        queue_clients: AtomicUsize,
        subscription_clients: AtomicUsize,
    }

    impl ServiceBusTransport for CountingTransport {
        fn name(&self) -> &str {
            "counting"
        }

        fn create_receiver(
            &self,
            connection: &str,
            entity_path: &str,
            prefetch_count: u32,
        ) -> TransportResult<Arc<dyn MessageReceiver>> {
            self.receivers.fetch_add(1, Ordering::SeqCst);
            self.inner.create_receiver(connection, entity_path, prefetch_count)
        }

        fn create_sender(
            &self,
            connection: &str,
            entity_path: &str,
        ) -> TransportResult<Arc<dyn MessageSender>> {
            self.senders.fetch_add(1, Ordering::SeqCst);
            self.inner.create_sender(connection, entity_path)
        }

        fn create_queue_client(
            &self,
            connection: &str,
            queue: &str,
            prefetch_count: u32,
        ) -> TransportResult<Arc<dyn EntityClient>> {
            self.queue_clients.fetch_add(1, Ordering::SeqCst);
            self.inner.create_queue_client(connection, queue, prefetch_count)
        }

        fn create_subscription_client(
            &self,
            connection: &str,
            topic: &str,
            subscription: &str,
            prefetch_count: u32,
        ) -> TransportResult<Arc<dyn EntityClient>> {
            self.subscription_clients.fetch_add(1, Ordering::SeqCst);
            self.inner
                .create_subscription_client(connection, topic, subscription, prefetch_count)
        }
    }

    fn provider_with(options: ServiceBusOptions) -> (MessagingProvider, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport::default());
        let provider = MessagingProvider::new(Arc::new(options), transport.clone());
        (provider, transport)
    }

    fn provider() -> (MessagingProvider, Arc<CountingTransport>) {
        provider_with(ServiceBusOptions::default().with_prefetch_count(7))
    }

    #[test]
    fn test_same_key_returns_same_receiver() {
        let (provider, transport) = provider();
        let a = provider.create_message_receiver("orders", CONN).unwrap();
        let b = provider.create_message_receiver("orders", CONN).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(transport.receivers.load(Ordering::SeqCst), 1);
        assert_eq!(a.prefetch_count(), 7);
    }

    #[test]
    fn test_different_key_returns_distinct_receiver() {
        let (provider, transport) = provider();
        let base = provider.create_message_receiver("orders", CONN).unwrap();
        let other_path = provider.create_message_receiver("invoices", CONN).unwrap();
        let other_conn = provider.create_message_receiver("orders", OTHER_CONN).unwrap();

        assert!(!Arc::ptr_eq(&base, &other_path));
        assert!(!Arc::ptr_eq(&base, &other_conn));
        assert_eq!(transport.receivers.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_processor_shares_cached_receiver() {
        let (provider, transport) = provider();
        let receiver = provider.create_message_receiver("orders", CONN).unwrap();
        let processor = provider.create_message_processor("orders", CONN).unwrap();

        assert!(Arc::ptr_eq(&receiver, processor.receiver()));
        assert_eq!(transport.receivers.load(Ordering::SeqCst), 1);
        assert_eq!(
            processor.options(),
            &provider.options().message_handler_options
        );
    }

    #[test]
    fn test_senders_are_cached_separately() {
        let (provider, transport) = provider();
        let a = provider.create_message_sender("orders", CONN).unwrap();
        let b = provider.create_message_sender("orders", CONN).unwrap();
        provider.create_message_receiver("orders", CONN).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(transport.senders.load(Ordering::SeqCst), 1);
        assert_eq!(provider.cached_counts(), (1, 1, 0));
    }

    #[test]
    fn test_empty_arguments_are_rejected_before_creation() {
        let (provider, transport) = provider();

        assert_eq!(
            provider.create_message_processor("", CONN).err(),
            Some(BindingError::MissingArgument {
                name: "entity_path"
            })
        );
        assert_eq!(
            provider.create_message_receiver("orders", "").err(),
            Some(BindingError::MissingArgument { name: "connection" })
        );
        assert!(provider.create_message_sender("", CONN).is_err());
        assert!(provider.create_client_entity("orders", "").is_err());
        assert!(provider.create_session_message_processor("", "").is_err());
        assert_eq!(transport.receivers.load(Ordering::SeqCst), 0);
        assert_eq!(provider.cached_counts(), (0, 0, 0));
    }

    #[test]
    fn test_get_or_add_receiver_rejects_empty_arguments() {
        let (provider, transport) = provider();

        assert_eq!(
            provider.get_or_add_message_receiver("", CONN).err(),
            Some(BindingError::MissingArgument {
                name: "entity_path"
            })
        );
        assert_eq!(
            provider.get_or_add_message_receiver("orders", "").err(),
            Some(BindingError::MissingArgument { name: "connection" })
        );
        assert_eq!(transport.receivers.load(Ordering::SeqCst), 0);
        assert_eq!(provider.cached_counts(), (0, 0, 0));
    }

    #[test]
    fn test_queue_client_uses_prefetch() {
        let (provider, transport) = provider();
        let client = provider.create_client_entity("orders", CONN).unwrap();

        assert_eq!(client.entity(), &EntityPath::Queue("orders".into()));
        assert_eq!(client.prefetch_count(), 7);
        assert_eq!(transport.queue_clients.load(Ordering::SeqCst), 1);
        assert_eq!(transport.subscription_clients.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_client_is_split_on_marker() {
        let (provider, transport) = provider();
        let client = provider
            .create_client_entity("orders/Subscriptions/billing", CONN)
            .unwrap();

        assert_eq!(
            client.entity(),
            &EntityPath::Subscription {
                topic: "orders".into(),
                subscription: "billing".into(),
            }
        );
        assert_eq!(client.prefetch_count(), 7);
        assert_eq!(transport.subscription_clients.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_markers_fall_back_to_queue() {
        let path = "a/Subscriptions/b/Subscriptions/c";
        let (provider, transport) = provider();
        let client = provider.create_client_entity(path, CONN).unwrap();

        assert_eq!(client.entity(), &EntityPath::Queue(path.into()));
        assert_eq!(transport.queue_clients.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_strict_paths_reject_multiple_markers() {
        let path = "a/Subscriptions/b/Subscriptions/c";
        let (provider, transport) =
            provider_with(ServiceBusOptions::default().with_strict_entity_paths(true));

        assert!(matches!(
            provider.create_client_entity(path, CONN),
            Err(BindingError::InvalidEntityPath { .. })
        ));
        assert_eq!(transport.queue_clients.load(Ordering::SeqCst), 0);
        assert!(provider.create_client_entity("a/Subscriptions/b", CONN).is_ok());
    }

    #[test]
    fn test_session_processor_shares_cached_client() {
        let (provider, transport) = provider();
        let client = provider.create_client_entity("chat", CONN).unwrap();
        let processor = provider.create_session_message_processor("chat", CONN).unwrap();

        assert!(Arc::ptr_eq(&client, processor.client()));
        assert_eq!(transport.queue_clients.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transport_error_is_not_cached() {
        let (provider, transport) = provider();
        let err = provider
            .create_message_receiver("orders", "no-endpoint")
            .err()
            .unwrap();

        assert!(matches!(
            err,
            BindingError::Transport(TransportError::InvalidConfig(_))
        ));
        assert!(err.is_configuration());
        assert_eq!(provider.cached_counts(), (0, 0, 0));
        assert!(provider.create_message_receiver("orders", "no-endpoint").is_err());
        assert_eq!(transport.receivers.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_observe_one_instance() {
        let (provider, transport) = provider();
        let provider = Arc::new(provider);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.create_message_receiver("orders", CONN) })
            })
            .collect();

        let mut receivers = Vec::new();
        for handle in handles {
            receivers.push(handle.await.unwrap().unwrap());
        }
        assert!(receivers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(transport.receivers.load(Ordering::SeqCst), 1);
    }
}
