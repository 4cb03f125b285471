//! Entities of one namespace endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use sbtrigger_core::{DEAD_LETTER_SUFFIX, EntityPath, TransportError, TransportResult};

use super::store::{EntityOptions, EntityStore};

#[derive(Default)]
struct Topic {
    subscriptions: HashMap<String, Arc<EntityStore>>,
}

/// Queues and topics registered under one endpoint.
pub(crate) struct Namespace {
    endpoint: String,
    queues: RwLock<HashMap<String, Arc<EntityStore>>>,
    topics: RwLock<HashMap<String, Topic>>,
}

impl Namespace {
    pub(crate) fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            queues: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn create_queue(&self, name: &str, options: EntityOptions) {
        self.queues
            .write()
            .entry(name.to_string())
            .or_insert_with(|| EntityStore::new(name, options));
    }

    pub(crate) fn create_topic(&self, name: &str) {
        self.topics.write().entry(name.to_string()).or_default();
    }

    pub(crate) fn create_subscription(
        &self,
        topic: &str,
        subscription: &str,
        options: EntityOptions,
    ) -> TransportResult<()> {
        let mut topics = self.topics.write();
        let entry = topics
            .get_mut(topic)
            .ok_or_else(|| TransportError::entity_not_found(topic))?;
        entry
            .subscriptions
            .entry(subscription.to_string())
            .or_insert_with(|| {
                EntityStore::new(EntityPath::subscription_path(topic, subscription), options)
            });
        Ok(())
    }

    /// Resolves the store messages are received from.
    ///
    /// Accepts queue paths, subscription paths and either with the
    /// dead-letter suffix.
    pub(crate) fn resolve(&self, path: &str) -> TransportResult<Arc<EntityStore>> {
        if let Some(base) = path.strip_suffix(DEAD_LETTER_SUFFIX) {
            return self
                .resolve(base)?
                .dead_letter_store()
                .cloned()
                .ok_or_else(|| TransportError::entity_not_found(path));
        }

        let found = match EntityPath::parse(path) {
            EntityPath::Queue(name) => self.queues.read().get(&name).cloned(),
            EntityPath::Subscription {
                topic,
                subscription,
            } => self
                .topics
                .read()
                .get(&topic)
                .and_then(|t| t.subscriptions.get(&subscription).cloned()),
        };
        found.ok_or_else(|| TransportError::entity_not_found(path))
    }

    /// Resolves the stores a send to `path` lands in: the queue itself, or
    /// every subscription of a topic.
    pub(crate) fn send_targets(&self, path: &str) -> TransportResult<Vec<Arc<EntityStore>>> {
        if let Some(queue) = self.queues.read().get(path) {
            return Ok(vec![queue.clone()]);
        }
        if let Some(topic) = self.topics.read().get(path) {
            return Ok(topic.subscriptions.values().cloned().collect());
        }
        if !EntityPath::parse(path).is_queue() {
            return Err(TransportError::invalid_config(format!(
                "cannot send to subscription '{path}'"
            )));
        }
        Err(TransportError::entity_not_found(path))
    }
}
