//! Listener lifecycle and receive pumps.
//!
//! A [`ServiceBusListener`] owns the background tasks that pull messages from
//! one entity and hand them to the host's executor. Three pump shapes exist:
//!
//! ```text
//! single   receive ──▶ spawn per message (bounded by max_concurrent_calls)
//! sessions accept session ──▶ receive in order ──▶ close on idle
//! batch    receive up to max_message_count ──▶ one invocation per batch
//! ```
//!
//! State machine:
//!
//! ```text
//! Created ──start()──▶ Started ──stop()──▶ Stopped
//!    └──────────────── dispose() ─────────────┴──▶ Disposed
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sbtrigger_core::{
    BatchOptions, MessageReceiver, MessageSession, ServiceBusMessage, ServiceBusOptions,
    TransportError,
};

use crate::account::ServiceBusAccount;
use crate::context::{BoxedExecutor, TriggeredFunctionData};
use crate::converter::TriggerValue;
use crate::error::{BindingError, BindingResult};
use crate::processor::{MessageProcessor, SessionMessageProcessor};
use crate::provider::MessagingProvider;

/// Pause after a failed receive before trying again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

// =============================================================================
// Factory
// =============================================================================

/// Creates a listener for one trigger.
#[async_trait]
pub trait ListenerFactory: Send + Sync {
    async fn create(&self, cancel: CancellationToken) -> BindingResult<Arc<ServiceBusListener>>;
}

/// Builds a [`ServiceBusListener`] from an account and the shared provider.
pub struct ServiceBusListenerFactory {
    account: ServiceBusAccount,
    executor: BoxedExecutor,
    options: Arc<ServiceBusOptions>,
    provider: Arc<MessagingProvider>,
    single_dispatch: bool,
}

impl ServiceBusListenerFactory {
    pub fn new(
        account: ServiceBusAccount,
        executor: BoxedExecutor,
        options: Arc<ServiceBusOptions>,
        provider: Arc<MessagingProvider>,
        single_dispatch: bool,
    ) -> Self {
        Self {
            account,
            executor,
            options,
            provider,
            single_dispatch,
        }
    }
}

#[async_trait]
impl ListenerFactory for ServiceBusListenerFactory {
    async fn create(&self, cancel: CancellationToken) -> BindingResult<Arc<ServiceBusListener>> {
        if cancel.is_cancelled() {
            return Err(BindingError::Cancelled);
        }

        let path = self.account.entity_path();
        let connection = self.account.connection_string();
        let batch = (!self.single_dispatch).then(|| self.options.batch_options.clone());

        let pump = if self.account.sessions_enabled() {
            let processor = self
                .provider
                .create_session_message_processor(path, connection)?;
            Pump::Sessions {
                processor: Arc::new(processor),
                batch,
            }
        } else {
            let processor = Arc::new(self.provider.create_message_processor(path, connection)?);
            match batch {
                Some(batch) => Pump::Batch { processor, batch },
                None => Pump::Single { processor },
            }
        };

        debug!(
            entity_path = %path,
            sessions = self.account.sessions_enabled(),
            single_dispatch = self.single_dispatch,
            "Listener created"
        );
        Ok(Arc::new(ServiceBusListener::new(
            path.to_string(),
            self.executor.clone(),
            pump,
        )))
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Lifecycle state of a [`ServiceBusListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Started,
    Stopped,
    Disposed,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Disposed => "disposed",
        }
    }
}

enum Pump {
    Single {
        processor: Arc<MessageProcessor>,
    },
    Batch {
        processor: Arc<MessageProcessor>,
        batch: BatchOptions,
    },
    Sessions {
        processor: Arc<SessionMessageProcessor>,
        batch: Option<BatchOptions>,
    },
}

/// Receives messages for one entity and feeds them to an executor.
pub struct ServiceBusListener {
    entity_path: String,
    executor: BoxedExecutor,
    pump: Pump,
    state: Mutex<ListenerState>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceBusListener {
    fn new(entity_path: String, executor: BoxedExecutor, pump: Pump) -> Self {
        Self {
            entity_path,
            executor,
            pump,
            state: Mutex::new(ListenerState::Created),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    /// Receiver used by the non-session pumps.
    pub fn receiver(&self) -> Option<Arc<dyn MessageReceiver>> {
        match &self.pump {
            Pump::Single { processor } | Pump::Batch { processor, .. } => {
                Some(processor.receiver().clone())
            }
            Pump::Sessions { .. } => None,
        }
    }

    /// Spawns the receive pumps.
    pub async fn start(&self, cancel: CancellationToken) -> BindingResult<()> {
        if cancel.is_cancelled() {
            return Err(BindingError::Cancelled);
        }
        self.transition("start", &[ListenerState::Created], ListenerState::Started)?;

        let handles = match &self.pump {
            Pump::Single { processor } => vec![tokio::spawn(run_single(
                processor.clone(),
                self.executor.clone(),
                self.shutdown.clone(),
            ))],
            Pump::Batch { processor, batch } => vec![tokio::spawn(run_batch(
                processor.clone(),
                batch.clone(),
                self.executor.clone(),
                self.shutdown.clone(),
            ))],
            Pump::Sessions { processor, batch } => {
                let count = processor.options().max_concurrent_sessions.max(1);
                (0..count)
                    .map(|_| {
                        tokio::spawn(run_sessions(
                            processor.clone(),
                            batch.clone(),
                            self.executor.clone(),
                            self.shutdown.clone(),
                        ))
                    })
                    .collect()
            }
        };
        self.tasks.lock().extend(handles);

        info!(entity_path = %self.entity_path, "Listener started");
        Ok(())
    }

    /// Stops the pumps and waits for in-flight invocations.
    ///
    /// Returns [`BindingError::Cancelled`] if `cancel` fires first; the pumps
    /// are still signalled to stop.
    pub async fn stop(&self, cancel: CancellationToken) -> BindingResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ListenerState::Disposed => return Err(self.disposed()),
                ListenerState::Stopped => return Ok(()),
                ListenerState::Created => return Err(self.invalid("stop", *state)),
                ListenerState::Started => *state = ListenerState::Stopped,
            }
        }

        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock());
        tokio::select! {
            _ = join_all(handles) => {}
            () = cancel.cancelled() => {
                warn!(
                    entity_path = %self.entity_path,
                    "Listener stop cancelled before pumps drained"
                );
                return Err(BindingError::Cancelled);
            }
        }

        info!(entity_path = %self.entity_path, "Listener stopped");
        Ok(())
    }

    /// Signals the pumps to stop without waiting.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Stops the pumps and closes the underlying client.
    pub async fn dispose(&self) -> BindingResult<()> {
        {
            let mut state = self.state.lock();
            if *state == ListenerState::Disposed {
                return Err(self.disposed());
            }
            *state = ListenerState::Disposed;
        }

        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock());
        join_all(handles).await;

        let closed = match &self.pump {
            Pump::Single { processor } | Pump::Batch { processor, .. } => {
                processor.receiver().close().await
            }
            Pump::Sessions { processor, .. } => processor.client().close().await,
        };
        if let Err(e) = closed {
            warn!(entity_path = %self.entity_path, error = %e, "Failed to close client");
        }

        info!(entity_path = %self.entity_path, "Listener disposed");
        Ok(())
    }

    fn transition(
        &self,
        operation: &'static str,
        from: &[ListenerState],
        to: ListenerState,
    ) -> BindingResult<()> {
        let mut state = self.state.lock();
        if *state == ListenerState::Disposed {
            return Err(self.disposed());
        }
        if !from.contains(&*state) {
            return Err(self.invalid(operation, *state));
        }
        *state = to;
        Ok(())
    }

    fn invalid(&self, operation: &'static str, state: ListenerState) -> BindingError {
        BindingError::InvalidState {
            entity_path: self.entity_path.clone(),
            operation,
            state: state.as_str(),
        }
    }

    fn disposed(&self) -> BindingError {
        BindingError::Disposed {
            entity_path: self.entity_path.clone(),
        }
    }
}

impl fmt::Debug for ServiceBusListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusListener")
            .field("entity_path", &self.entity_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for ServiceBusListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Pumps
// =============================================================================

/// What the pump should do after a receive error.
async fn on_receive_error(
    entity_path: &str,
    err: TransportError,
    shutdown: &CancellationToken,
) -> bool {
    if matches!(err, TransportError::Closed { .. }) {
        debug!(entity_path = %entity_path, "Client closed, pump exiting");
        return false;
    }
    error!(entity_path = %entity_path, error = %err, "Receive failed");
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => true,
    }
}

async fn run_single(
    processor: Arc<MessageProcessor>,
    executor: BoxedExecutor,
    shutdown: CancellationToken,
) {
    let receiver = processor.receiver().clone();
    let max_calls = processor.options().max_concurrent_calls.max(1);
    let receive_timeout = processor.options().receive_timeout;
    let permits = Arc::new(Semaphore::new(max_calls));
    let mut in_flight = JoinSet::new();

    loop {
        while in_flight.try_join_next().is_some() {}

        // Wait for capacity before pulling more messages off the entity.
        let first = tokio::select! {
            () = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let capacity = permits.available_permits() + 1;

        let received = tokio::select! {
            () = shutdown.cancelled() => break,
            received = receiver.receive(capacity, receive_timeout) => received,
        };
        let messages = match received {
            Ok(messages) => messages,
            Err(e) => {
                if on_receive_error(receiver.entity_path(), e, &shutdown).await {
                    continue;
                }
                break;
            }
        };

        let mut first = Some(first);
        for message in messages {
            let permit = match first.take() {
                Some(permit) => permit,
                None => match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let processor = processor.clone();
            let executor = executor.clone();
            let cancel = shutdown.child_token();
            in_flight.spawn(async move {
                let _permit = permit;
                process_message(&processor, &executor, message, cancel).await;
            });
        }
    }

    while in_flight.join_next().await.is_some() {}
    debug!(entity_path = %receiver.entity_path(), "Message pump exited");
}

async fn process_message(
    processor: &MessageProcessor,
    executor: &BoxedExecutor,
    message: ServiceBusMessage,
    cancel: CancellationToken,
) {
    if !processor.begin_processing(&message) {
        return;
    }
    let input = TriggeredFunctionData::new(TriggerValue::Message(message.clone()));
    let result = executor.try_execute(input, cancel).await;
    if let Err(e) = processor.complete_processing(&message, &result).await {
        warn!(
            entity_path = %processor.receiver().entity_path(),
            message_id = ?message.message_id,
            error = %e,
            "Failed to settle message"
        );
    }
}

async fn run_batch(
    processor: Arc<MessageProcessor>,
    batch: BatchOptions,
    executor: BoxedExecutor,
    shutdown: CancellationToken,
) {
    let receiver = processor.receiver().clone();
    let max = batch.max_message_count.max(1);

    loop {
        let received = tokio::select! {
            () = shutdown.cancelled() => break,
            received = receiver.receive(max, batch.operation_timeout) => received,
        };
        let messages: Vec<_> = match received {
            Ok(messages) => messages
                .into_iter()
                .filter(|m| processor.begin_processing(m))
                .collect(),
            Err(e) => {
                if on_receive_error(receiver.entity_path(), e, &shutdown).await {
                    continue;
                }
                break;
            }
        };
        if messages.is_empty() {
            continue;
        }

        debug!(
            entity_path = %receiver.entity_path(),
            count = messages.len(),
            "Dispatching batch"
        );
        let input = TriggeredFunctionData::new(TriggerValue::Messages(messages.clone()));
        let result = executor.try_execute(input, shutdown.child_token()).await;
        if let Err(e) = processor
            .complete_batch(&messages, &result, batch.auto_complete)
            .await
        {
            warn!(entity_path = %receiver.entity_path(), error = %e, "Failed to settle batch");
        }
    }

    debug!(entity_path = %receiver.entity_path(), "Batch pump exited");
}

async fn run_sessions(
    processor: Arc<SessionMessageProcessor>,
    batch: Option<BatchOptions>,
    executor: BoxedExecutor,
    shutdown: CancellationToken,
) {
    let client = processor.client().clone();
    let entity_path = client.entity().to_string();
    let wait = processor.options().message_wait_timeout;

    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = client.accept_session(wait) => accepted,
        };
        match accepted {
            Ok(Some(session)) => {
                process_session(&processor, batch.as_ref(), &executor, session, &shutdown)
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                if !on_receive_error(&entity_path, e, &shutdown).await {
                    break;
                }
            }
        }
    }
}

/// Drains one session in order, then closes it once it has been idle for
/// `message_wait_timeout`.
async fn process_session(
    processor: &SessionMessageProcessor,
    batch: Option<&BatchOptions>,
    executor: &BoxedExecutor,
    session: Arc<dyn MessageSession>,
    shutdown: &CancellationToken,
) {
    let wait = processor.options().message_wait_timeout;
    let max = batch.map_or(1, |b| b.max_message_count.max(1));
    debug!(
        entity_path = %session.entity_path(),
        session_id = %session.session_id(),
        "Session pump started"
    );

    loop {
        let received = tokio::select! {
            () = shutdown.cancelled() => break,
            received = session.receive(max, wait) => received,
        };
        let messages = match received {
            Ok(messages) if messages.is_empty() => break,
            Ok(messages) => messages,
            Err(e) => {
                warn!(session_id = %session.session_id(), error = %e, "Session receive failed");
                break;
            }
        };

        if let Some(batch) = batch {
            let messages: Vec<_> = messages
                .into_iter()
                .filter(|m| processor.begin_processing(session.as_ref(), m))
                .collect();
            if messages.is_empty() {
                continue;
            }
            let input = TriggeredFunctionData::new(TriggerValue::Messages(messages.clone()))
                .with_session(session.clone());
            let result = executor.try_execute(input, shutdown.child_token()).await;
            if let Err(e) = processor
                .complete_batch(session.as_ref(), &messages, &result, batch.auto_complete)
                .await
            {
                warn!(session_id = %session.session_id(), error = %e, "Failed to settle batch");
            }
            continue;
        }

        for message in messages {
            if !processor.begin_processing(session.as_ref(), &message) {
                continue;
            }
            let input = TriggeredFunctionData::new(TriggerValue::Message(message.clone()))
                .with_session(session.clone());
            let result = executor.try_execute(input, shutdown.child_token()).await;
            if let Err(e) = processor
                .complete_processing(session.as_ref(), &message, &result)
                .await
            {
                warn!(
                    session_id = %session.session_id(),
                    message_id = ?message.message_id,
                    error = %e,
                    "Failed to settle message"
                );
            }
        }
    }

    if let Err(e) = session.close().await {
        warn!(session_id = %session.session_id(), error = %e, "Failed to close session");
    }
    debug!(session_id = %session.session_id(), "Session closed");
}
