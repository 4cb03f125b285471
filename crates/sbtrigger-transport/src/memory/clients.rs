//! Client handles over the in-process broker.
//!
//! Handles resolve their entity on first use, so creating a client for an
//! entity that does not exist yet succeeds and only the first operation fails.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use sbtrigger_core::{
    EntityClient, EntityPath, MessageMetadata, MessageReceiver, MessageSender, MessageSession,
    ServiceBusMessage, TransportError, TransportResult,
};

use super::namespace::Namespace;
use super::store::EntityStore;

// =============================================================================
// Receiver
// =============================================================================

/// Receiver for a queue, subscription or dead-letter sub-queue.
pub struct InMemoryReceiver {
    namespace: Arc<Namespace>,
    entity_path: String,
    prefetch_count: u32,
    store: OnceLock<Arc<EntityStore>>,
    prefetched: Mutex<VecDeque<ServiceBusMessage>>,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    pub(crate) fn new(namespace: Arc<Namespace>, entity_path: &str, prefetch_count: u32) -> Self {
        Self {
            namespace,
            entity_path: entity_path.to_string(),
            prefetch_count,
            store: OnceLock::new(),
            prefetched: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn store(&self) -> TransportResult<&Arc<EntityStore>> {
        if self.is_closed() {
            return Err(TransportError::closed(&self.entity_path));
        }
        if let Some(store) = self.store.get() {
            return Ok(store);
        }
        let store = self.namespace.resolve(&self.entity_path)?;
        debug!(entity_path = %self.entity_path, "Receiver attached to entity");
        Ok(self.store.get_or_init(|| store))
    }

    /// Number of messages currently held in the prefetch buffer.
    pub fn prefetched_len(&self) -> usize {
        self.prefetched.lock().len()
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    fn prefetch_count(&self) -> u32 {
        self.prefetch_count
    }

    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> TransportResult<Vec<ServiceBusMessage>> {
        let store = self.store()?;
        if store.requires_session() {
            return Err(TransportError::SessionMismatch {
                entity_path: self.entity_path.clone(),
                reason: "entity requires sessions; accept a session instead".into(),
            });
        }
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        {
            let mut prefetched = self.prefetched.lock();
            if !prefetched.is_empty() {
                let n = max_messages.min(prefetched.len());
                return Ok(prefetched.drain(..n).collect());
            }
        }

        let wanted = max_messages + self.prefetch_count as usize;
        let mut batch = store.receive(wanted, max_wait, None).await;
        if batch.len() > max_messages {
            let extra = batch.split_off(max_messages);
            trace!(
                entity_path = %self.entity_path,
                count = extra.len(),
                "Buffered prefetched messages"
            );
            self.prefetched.lock().extend(extra);
        }
        Ok(batch)
    }

    async fn complete(&self, lock_token: &str) -> TransportResult<()> {
        self.store()?.complete(lock_token)
    }

    async fn abandon(&self, lock_token: &str) -> TransportResult<()> {
        self.store()?.abandon(lock_token)
    }

    async fn dead_letter(&self, lock_token: &str, reason: Option<&str>) -> TransportResult<()> {
        self.store()?.dead_letter(lock_token, reason)
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let buffered: Vec<_> = self.prefetched.lock().drain(..).collect();
        if let Some(store) = self.store.get() {
            for message in &buffered {
                if let Ok(token) = message.lock_token() {
                    store.release(&token);
                }
            }
        }
        debug!(entity_path = %self.entity_path, released = buffered.len(), "Receiver closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Receiver bound to one locked session.
pub struct InMemorySession {
    store: Arc<EntityStore>,
    session_id: String,
    prefetch_count: u32,
    closed: AtomicBool,
}

impl InMemorySession {
    pub(crate) fn new(store: Arc<EntityStore>, session_id: String, prefetch_count: u32) -> Self {
        Self {
            store,
            session_id,
            prefetch_count,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::closed(self.store.path()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageReceiver for InMemorySession {
    fn entity_path(&self) -> &str {
        self.store.path()
    }

    fn prefetch_count(&self) -> u32 {
        self.prefetch_count
    }

    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> TransportResult<Vec<ServiceBusMessage>> {
        self.ensure_open()?;
        Ok(self
            .store
            .receive(max_messages, max_wait, Some(&self.session_id))
            .await)
    }

    async fn complete(&self, lock_token: &str) -> TransportResult<()> {
        self.ensure_open()?;
        self.store.complete(lock_token)
    }

    async fn abandon(&self, lock_token: &str) -> TransportResult<()> {
        self.ensure_open()?;
        self.store.abandon(lock_token)
    }

    async fn dead_letter(&self, lock_token: &str, reason: Option<&str>) -> TransportResult<()> {
        self.ensure_open()?;
        self.store.dead_letter(lock_token, reason)
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.store.release_session(&self.session_id);
            debug!(
                entity_path = %self.store.path(),
                session_id = %self.session_id,
                "Session released"
            );
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MessageSession for InMemorySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn get_state(&self) -> TransportResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.store.session_state(&self.session_id))
    }

    async fn set_state(&self, state: Option<Vec<u8>>) -> TransportResult<()> {
        self.ensure_open()?;
        self.store.set_session_state(&self.session_id, state);
        Ok(())
    }
}

// =============================================================================
// Entity client
// =============================================================================

/// Queue or subscription client used to accept sessions.
pub struct InMemoryEntityClient {
    namespace: Arc<Namespace>,
    entity: EntityPath,
    path: String,
    prefetch_count: u32,
    closed: AtomicBool,
}

impl InMemoryEntityClient {
    pub(crate) fn new(namespace: Arc<Namespace>, entity: EntityPath, prefetch_count: u32) -> Self {
        let path = entity.to_string();
        Self {
            namespace,
            entity,
            path,
            prefetch_count,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EntityClient for InMemoryEntityClient {
    fn entity(&self) -> &EntityPath {
        &self.entity
    }

    fn prefetch_count(&self) -> u32 {
        self.prefetch_count
    }

    async fn accept_session(
        &self,
        max_wait: Duration,
    ) -> TransportResult<Option<Arc<dyn MessageSession>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed(&self.path));
        }
        let store = self.namespace.resolve(&self.path)?;
        if !store.requires_session() {
            return Err(TransportError::SessionMismatch {
                entity_path: self.path.clone(),
                reason: "entity is not session-enabled".into(),
            });
        }

        let Some(session_id) = store.accept_session(max_wait).await else {
            return Ok(None);
        };
        debug!(entity_path = %self.path, session_id = %session_id, "Session accepted");
        let session: Arc<dyn MessageSession> =
            Arc::new(InMemorySession::new(store, session_id, self.prefetch_count));
        Ok(Some(session))
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// =============================================================================
// Sender
// =============================================================================

/// Sender for a queue or topic.
pub struct InMemorySender {
    namespace: Arc<Namespace>,
    entity_path: String,
    closed: AtomicBool,
}

impl InMemorySender {
    pub(crate) fn new(namespace: Arc<Namespace>, entity_path: &str) -> Self {
        Self {
            namespace,
            entity_path: entity_path.to_string(),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MessageSender for InMemorySender {
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    async fn send(&self, message: ServiceBusMessage) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed(&self.entity_path));
        }
        for store in self.namespace.send_targets(&self.entity_path)? {
            store.enqueue(message.clone())?;
        }
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
