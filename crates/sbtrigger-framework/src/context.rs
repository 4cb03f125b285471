//! Contexts and seams between the listener, the trigger binding and the host.
//!
//! The host owns the execution pipeline. A listener only knows it through the
//! [`TriggeredFunctionExecutor`] trait: it hands every received payload to
//! [`try_execute`](TriggeredFunctionExecutor::try_execute) and settles the
//! message from the returned [`FunctionResult`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sbtrigger_core::MessageSession;

use crate::converter::TriggerValue;

// =============================================================================
// Executor seam
// =============================================================================

/// Outcome of one function invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionResult {
    pub succeeded: bool,
    pub error: Option<String>,
}

impl FunctionResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            succeeded: false,
            error: Some(error.to_string()),
        }
    }
}

/// Input handed from a listener to the host pipeline.
#[derive(Clone, Default)]
pub struct TriggeredFunctionData {
    /// Raw payload. `None` models a null trigger value.
    pub trigger_value: Option<TriggerValue>,
    /// Session the payload was received through, if any.
    pub message_session: Option<Arc<dyn MessageSession>>,
    /// Invocation that caused this one, if any.
    pub parent_id: Option<Uuid>,
}

impl TriggeredFunctionData {
    pub fn new(trigger_value: TriggerValue) -> Self {
        Self {
            trigger_value: Some(trigger_value),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session: Arc<dyn MessageSession>) -> Self {
        self.message_session = Some(session);
        self
    }
}

impl fmt::Debug for TriggeredFunctionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggeredFunctionData")
            .field("trigger_value", &self.trigger_value)
            .field(
                "message_session",
                &self.message_session.as_ref().map(|s| s.session_id().to_string()),
            )
            .field("parent_id", &self.parent_id)
            .finish()
    }
}

/// The host's execution pipeline, as seen by a listener.
#[async_trait]
pub trait TriggeredFunctionExecutor: Send + Sync {
    async fn try_execute(
        &self,
        input: TriggeredFunctionData,
        cancel: CancellationToken,
    ) -> FunctionResult;
}

/// Shared executor handle.
pub type BoxedExecutor = Arc<dyn TriggeredFunctionExecutor>;

// =============================================================================
// Binding contexts
// =============================================================================

/// Per-invocation context passed to [`bind`](crate::ServiceBusTriggerBinding::bind).
#[derive(Clone)]
pub struct ValueBindingContext {
    function_instance_id: Uuid,
    cancellation: CancellationToken,
    message_session: Option<Arc<dyn MessageSession>>,
}

impl ValueBindingContext {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            function_instance_id: Uuid::new_v4(),
            cancellation,
            message_session: None,
        }
    }

    pub fn with_session(mut self, session: Option<Arc<dyn MessageSession>>) -> Self {
        self.message_session = session;
        self
    }

    pub fn function_instance_id(&self) -> Uuid {
        self.function_instance_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn message_session(&self) -> Option<&Arc<dyn MessageSession>> {
        self.message_session.as_ref()
    }
}

impl Default for ValueBindingContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// Context for creating a listener.
#[derive(Clone)]
pub struct ListenerFactoryContext {
    executor: BoxedExecutor,
    cancellation: CancellationToken,
}

impl ListenerFactoryContext {
    pub fn new(executor: BoxedExecutor, cancellation: CancellationToken) -> Self {
        Self {
            executor,
            cancellation,
        }
    }

    pub fn executor(&self) -> &BoxedExecutor {
        &self.executor
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}
