//! Message storage for a single queue or subscription.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace};
use uuid::Uuid;

use sbtrigger_core::{
    EntityPath, ServiceBusMessage, SystemProperties, TransportError, TransportResult,
};

/// Properties applied when an entity is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityOptions {
    /// Messages must carry a session id and are received through sessions.
    pub requires_session: bool,
    /// Deliveries after which an abandoned message is dead-lettered.
    pub max_delivery_count: i32,
    /// How long a receive lock is reported as held.
    pub lock_duration: Duration,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            requires_session: false,
            max_delivery_count: 10,
            lock_duration: Duration::from_secs(60),
        }
    }
}

impl EntityOptions {
    /// Options for a session-enabled entity.
    pub fn sessions() -> Self {
        Self {
            requires_session: true,
            ..Self::default()
        }
    }

    /// Sets the maximum delivery count.
    pub fn with_max_delivery_count(mut self, count: i32) -> Self {
        self.max_delivery_count = count;
        self
    }
}

#[derive(Default)]
struct StoreState {
    next_sequence: i64,
    active: VecDeque<ServiceBusMessage>,
    locked: HashMap<Uuid, ServiceBusMessage>,
    locked_sessions: HashSet<String>,
    session_state: HashMap<String, Vec<u8>>,
}

/// Active messages, locks, sessions and the dead-letter sub-queue of one entity.
pub(crate) struct EntityStore {
    path: String,
    options: EntityOptions,
    state: Mutex<StoreState>,
    notify: Notify,
    dead_letter: Option<Arc<EntityStore>>,
}

impl EntityStore {
    pub(crate) fn new(path: impl Into<String>, options: EntityOptions) -> Arc<Self> {
        let path = path.into();
        let dead_letter = Arc::new(Self {
            path: EntityPath::dead_letter_path(&path),
            options: EntityOptions {
                requires_session: false,
                ..options
            },
            state: Mutex::new(StoreState::default()),
            notify: Notify::new(),
            dead_letter: None,
        });
        Arc::new(Self {
            path,
            options,
            state: Mutex::new(StoreState::default()),
            notify: Notify::new(),
            dead_letter: Some(dead_letter),
        })
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn requires_session(&self) -> bool {
        self.options.requires_session
    }

    pub(crate) fn dead_letter_store(&self) -> Option<&Arc<EntityStore>> {
        self.dead_letter.as_ref()
    }

    // ─── Sending ──────────────────────────────────────────────────────────────

    /// Accepts a new message, assigning its sequence number and enqueue time.
    pub(crate) fn enqueue(&self, message: ServiceBusMessage) -> TransportResult<()> {
        if self.options.requires_session && message.session_id.is_none() {
            return Err(TransportError::SendFailed(format!(
                "entity '{}' requires a session id",
                self.path
            )));
        }

        let mut state = self.state.lock();
        state.next_sequence += 1;
        let sequence = state.next_sequence;
        let message = message.clone_for_send().with_system_properties(
            SystemProperties::new(sequence, Utc::now()).with_delivery_count(0),
        );
        state.active.push_back(message);
        drop(state);

        trace!(entity_path = %self.path, sequence_number = sequence, "Message enqueued");
        self.notify.notify_waiters();
        Ok(())
    }

    /// Appends a message that keeps its broker-assigned properties.
    fn push_existing(&self, message: ServiceBusMessage) {
        self.state.lock().active.push_back(message);
        self.notify.notify_waiters();
    }

    // ─── Receiving ────────────────────────────────────────────────────────────

    /// Locks up to `max` messages, waiting until `max_wait` for the first.
    ///
    /// With `session` set, only messages of that session are considered.
    pub(crate) async fn receive(
        &self,
        max: usize,
        max_wait: Duration,
        session: Option<&str>,
    ) -> Vec<ServiceBusMessage> {
        let deadline = Instant::now() + max_wait;
        loop {
            // Created before the check so a send in between is not missed.
            let notified = self.notify.notified();
            let batch = self.lock_messages(max, session);
            if !batch.is_empty() {
                return batch;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Vec::new();
            }
        }
    }

    fn lock_messages(&self, max: usize, session: Option<&str>) -> Vec<ServiceBusMessage> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let lock_duration = chrono::Duration::from_std(self.options.lock_duration)
            .unwrap_or(chrono::Duration::zero());

        let mut taken = Vec::new();
        let mut index = 0;
        while index < state.active.len() && taken.len() < max {
            let matches = session
                .is_none_or(|id| state.active[index].session_id.as_deref() == Some(id));
            if !matches {
                index += 1;
                continue;
            }
            let Some(mut message) = state.active.remove(index) else {
                break;
            };
            let token = Uuid::new_v4();
            if let Some(props) = message.system_properties_mut() {
                props.delivery_count += 1;
                props.lock_token = Some(token);
                props.locked_until = Some(now + lock_duration);
            }
            state.locked.insert(token, message.clone());
            taken.push(message);
        }
        taken
    }

    // ─── Settlement ───────────────────────────────────────────────────────────

    pub(crate) fn complete(&self, lock_token: &str) -> TransportResult<()> {
        let token = parse_token(lock_token)?;
        self.state
            .lock()
            .locked
            .remove(&token)
            .map(|_| ())
            .ok_or_else(|| TransportError::lock_lost(lock_token))
    }

    pub(crate) fn abandon(&self, lock_token: &str) -> TransportResult<()> {
        let token = parse_token(lock_token)?;
        let mut message = self
            .state
            .lock()
            .locked
            .remove(&token)
            .ok_or_else(|| TransportError::lock_lost(lock_token))?;

        let deliveries = message
            .system_properties()
            .map_or(0, |props| props.delivery_count);
        if deliveries >= self.options.max_delivery_count {
            debug!(
                entity_path = %self.path,
                delivery_count = deliveries,
                "Max delivery count exceeded, dead-lettering"
            );
            self.move_to_dead_letter(message, "MaxDeliveryCountExceeded");
            return Ok(());
        }

        clear_lock(&mut message);
        self.requeue(message);
        Ok(())
    }

    pub(crate) fn dead_letter(
        &self,
        lock_token: &str,
        reason: Option<&str>,
    ) -> TransportResult<()> {
        let token = parse_token(lock_token)?;
        let message = self
            .state
            .lock()
            .locked
            .remove(&token)
            .ok_or_else(|| TransportError::lock_lost(lock_token))?;
        self.move_to_dead_letter(message, reason.unwrap_or("DeadLetteredByReceiver"));
        Ok(())
    }

    /// Returns locked messages to the entity without counting as an abandon.
    pub(crate) fn release(&self, lock_token: &str) {
        let Ok(token) = parse_token(lock_token) else {
            return;
        };
        let message = self.state.lock().locked.remove(&token);
        if let Some(mut message) = message {
            clear_lock(&mut message);
            if let Some(props) = message.system_properties_mut() {
                props.delivery_count = (props.delivery_count - 1).max(0);
            }
            self.requeue(message);
        }
    }

    fn requeue(&self, message: ServiceBusMessage) {
        let sequence = sequence_of(&message);
        let mut state = self.state.lock();
        let position = state
            .active
            .iter()
            .position(|m| sequence_of(m) > sequence)
            .unwrap_or(state.active.len());
        state.active.insert(position, message);
        drop(state);
        self.notify.notify_waiters();
    }

    fn move_to_dead_letter(&self, mut message: ServiceBusMessage, reason: &str) {
        clear_lock(&mut message);
        message
            .user_properties
            .insert("DeadLetterReason".into(), reason.into());
        if let Some(props) = message.system_properties_mut() {
            props.dead_letter_source = Some(self.path.clone());
        }
        match &self.dead_letter {
            Some(dlq) => dlq.push_existing(message),
            None => debug!(
                entity_path = %self.path,
                "Dropping message dead-lettered from a dead-letter queue"
            ),
        }
    }

    // ─── Sessions ─────────────────────────────────────────────────────────────

    /// Locks the next session that has active messages, waiting until `max_wait`.
    pub(crate) async fn accept_session(&self, max_wait: Duration) -> Option<String> {
        let deadline = Instant::now() + max_wait;
        loop {
            let notified = self.notify.notified();
            if let Some(id) = self.lock_next_session() {
                return Some(id);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    fn lock_next_session(&self) -> Option<String> {
        let mut state = self.state.lock();
        let id = state
            .active
            .iter()
            .filter_map(|m| m.session_id.as_deref())
            .find(|id| !state.locked_sessions.contains(*id))?
            .to_string();
        state.locked_sessions.insert(id.clone());
        Some(id)
    }

    pub(crate) fn release_session(&self, session_id: &str) {
        self.state.lock().locked_sessions.remove(session_id);
        self.notify.notify_waiters();
    }

    pub(crate) fn session_state(&self, session_id: &str) -> Option<Vec<u8>> {
        self.state.lock().session_state.get(session_id).cloned()
    }

    pub(crate) fn set_session_state(&self, session_id: &str, value: Option<Vec<u8>>) {
        let mut state = self.state.lock();
        match value {
            Some(value) => state.session_state.insert(session_id.to_string(), value),
            None => state.session_state.remove(session_id),
        };
    }

    // ─── Inspection ───────────────────────────────────────────────────────────

    pub(crate) fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub(crate) fn locked_count(&self) -> usize {
        self.state.lock().locked.len()
    }

    pub(crate) fn peek_active(&self) -> Vec<ServiceBusMessage> {
        self.state.lock().active.iter().cloned().collect()
    }
}

fn parse_token(lock_token: &str) -> TransportResult<Uuid> {
    Uuid::parse_str(lock_token).map_err(|_| TransportError::lock_lost(lock_token))
}

fn sequence_of(message: &ServiceBusMessage) -> i64 {
    message
        .system_properties()
        .map_or(i64::MAX, |props| props.sequence_number)
}

fn clear_lock(message: &mut ServiceBusMessage) {
    if let Some(props) = message.system_properties_mut() {
        props.lock_token = None;
        props.locked_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbtrigger_core::MessageMetadata;

    #[tokio::test]
    async fn test_enqueue_assigns_sequence_numbers() {
        let store = EntityStore::new("orders", EntityOptions::default());
        store.enqueue(ServiceBusMessage::from_text("a")).unwrap();
        store.enqueue(ServiceBusMessage::from_text("b")).unwrap();

        let batch = store.receive(10, Duration::ZERO, None).await;
        let sequences: Vec<i64> = batch.iter().map(|m| m.sequence_number().unwrap()).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert!(batch.iter().all(|m| m.delivery_count() == Ok(1)));
        assert!(batch.iter().all(MessageMetadata::is_lock_token_set));
        assert_eq!(store.locked_count(), 2);
    }

    #[tokio::test]
    async fn test_abandon_redelivers_in_order() {
        let store = EntityStore::new("orders", EntityOptions::default());
        for body in ["a", "b"] {
            store.enqueue(ServiceBusMessage::from_text(body)).unwrap();
        }
        let first = store.receive(1, Duration::ZERO, None).await;
        store.abandon(&first[0].lock_token().unwrap()).unwrap();

        let again = store.receive(2, Duration::ZERO, None).await;
        assert_eq!(again[0].body_text().unwrap(), "a");
        assert_eq!(again[0].delivery_count(), Ok(2));
        assert_eq!(again[1].body_text().unwrap(), "b");
    }

    #[tokio::test]
    async fn test_max_delivery_count_dead_letters() {
        let store = EntityStore::new("orders", EntityOptions::default().with_max_delivery_count(1));
        store.enqueue(ServiceBusMessage::from_text("poison")).unwrap();

        let batch = store.receive(1, Duration::ZERO, None).await;
        store.abandon(&batch[0].lock_token().unwrap()).unwrap();

        assert_eq!(store.active_count(), 0);
        let dlq = store.dead_letter_store().unwrap();
        let dead = dlq.peek_active();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].dead_letter_source(), Ok(Some("orders")));
        assert_eq!(
            dead[0].user_properties.get("DeadLetterReason"),
            Some(&serde_json::Value::from("MaxDeliveryCountExceeded"))
        );
    }

    #[tokio::test]
    async fn test_complete_unknown_token_is_lock_lost() {
        let store = EntityStore::new("orders", EntityOptions::default());
        let err = store.complete(&Uuid::new_v4().to_string()).unwrap_err();
        assert!(matches!(err, TransportError::LockLost { .. }));
        assert!(store.complete("not-a-token").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_empty() {
        let store = EntityStore::new("orders", EntityOptions::default());
        let batch = store.receive(1, Duration::from_secs(5), None).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_send() {
        let store = EntityStore::new("orders", EntityOptions::default());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.receive(1, Duration::from_secs(30), None).await })
        };
        tokio::task::yield_now().await;
        store.enqueue(ServiceBusMessage::from_text("late")).unwrap();

        let batch = waiter.await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_locked_exclusively() {
        let store = EntityStore::new("chat", EntityOptions::sessions());
        assert!(store.enqueue(ServiceBusMessage::from_text("no session")).is_err());
        store
            .enqueue(ServiceBusMessage::from_text("a1").with_session_id("a"))
            .unwrap();
        store
            .enqueue(ServiceBusMessage::from_text("b1").with_session_id("b"))
            .unwrap();

        assert_eq!(store.accept_session(Duration::ZERO).await.as_deref(), Some("a"));
        assert_eq!(store.accept_session(Duration::ZERO).await.as_deref(), Some("b"));
        assert_eq!(store.accept_session(Duration::ZERO).await, None);

        let batch = store.receive(10, Duration::ZERO, Some("b")).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body_text().unwrap(), "b1");

        store.release_session("a");
        assert_eq!(store.accept_session(Duration::ZERO).await.as_deref(), Some("a"));
    }
}
