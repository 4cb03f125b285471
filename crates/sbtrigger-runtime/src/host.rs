//! The trigger host: registered functions, their listeners, and the
//! execution pipeline between them.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sbtrigger_runtime::{FunctionSpec, TriggerHost};
//! use sbtrigger_framework::TextArgumentBinding;
//!
//! // Loads sbtrigger.toml from the current directory, if any
//! let host = TriggerHost::new();
//!
//! host.register_function(
//!     "process-order",
//!     FunctionSpec::new("orders"),
//!     TextArgumentBinding,
//!     |body: String, data: BindingData| async move {
//!         tracing::info!(%body, fields = data.len(), "Order received");
//!         anyhow::Ok(())
//!     },
//! )?;
//!
//! host.run().await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use sbtrigger_core::{BindingData, BoxedTransport, ServiceBusMessage, ServiceBusOptions};
use sbtrigger_framework::{
    BoxedExecutor, FunctionResult, ListenerFactoryContext, ListenerState, MessagingProvider,
    ServiceBusAccount, ServiceBusListener, ServiceBusTriggerBinding,
    ServiceBusTriggerParameterDescriptor, TriggerDataArgumentBinding, TriggerPayload,
    TriggerValue, TriggeredFunctionData, TriggeredFunctionExecutor, ValueBindingContext,
};
use sbtrigger_transport::InMemoryTransport;

use crate::config::{ConfigLoader, ConfigResult, DEFAULT_CONNECTION_NAME, TriggerHostConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

const DEFAULT_PARAMETER_NAME: &str = "message";

// =============================================================================
// Function registration
// =============================================================================

/// Where a function is triggered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    /// Queue name or `topic/Subscriptions/name`.
    pub entity_path: String,
    /// Name of the connection in [`TriggerHostConfig::connections`].
    pub connection: String,
    /// Receive through sessions.
    pub sessions: bool,
    /// Name of the handler parameter, reported in the descriptor.
    pub parameter_name: String,
}

impl FunctionSpec {
    pub fn new(entity_path: impl Into<String>) -> Self {
        Self {
            entity_path: entity_path.into(),
            connection: DEFAULT_CONNECTION_NAME.to_string(),
            sessions: false,
            parameter_name: DEFAULT_PARAMETER_NAME.to_string(),
        }
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = connection.into();
        self
    }

    pub fn with_sessions(mut self, sessions: bool) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_parameter_name(mut self, name: impl Into<String>) -> Self {
        self.parameter_name = name.into();
        self
    }
}

/// Future returned by a [`FunctionHandler`].
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// User code invoked with the bound value and its binding data.
///
/// Implemented for any `Fn(V, BindingData) -> impl Future<Output = anyhow::Result<()>>`.
pub trait FunctionHandler<V>: Send + Sync + 'static {
    fn call(&self, value: V, binding_data: BindingData) -> HandlerFuture;
}

impl<V, F, Fut> FunctionHandler<V> for F
where
    F: Fn(V, BindingData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, value: V, binding_data: BindingData) -> HandlerFuture {
        self(value, binding_data).boxed()
    }
}

/// A registered function, independent of its payload and value types.
#[async_trait]
trait HostedFunction: Send + Sync {
    fn name(&self) -> &str;

    fn entity_path(&self) -> &str;

    fn listener(&self) -> Option<Arc<ServiceBusListener>>;

    fn descriptor(&self) -> ServiceBusTriggerParameterDescriptor;

    /// Creates the listener, handing it an executor that refers back to this
    /// function weakly.
    fn create_listener(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, RuntimeResult<Arc<ServiceBusListener>>>;

    async fn invoke(
        &self,
        input: TriggeredFunctionData,
        cancel: CancellationToken,
    ) -> FunctionResult;
}

struct Registration<T: TriggerPayload, A: TriggerDataArgumentBinding<T>> {
    name: String,
    binding: ServiceBusTriggerBinding<T, A>,
    handler: Box<dyn FunctionHandler<A::Value>>,
}

#[async_trait]
impl<T, A> HostedFunction for Registration<T, A>
where
    T: TriggerPayload,
    A: TriggerDataArgumentBinding<T> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn entity_path(&self) -> &str {
        self.binding.account().entity_path()
    }

    fn listener(&self) -> Option<Arc<ServiceBusListener>> {
        self.binding.listener().cloned()
    }

    fn descriptor(&self) -> ServiceBusTriggerParameterDescriptor {
        self.binding.to_parameter_descriptor()
    }

    fn create_listener(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, RuntimeResult<Arc<ServiceBusListener>>> {
        async move {
            let strong: Arc<dyn HostedFunction> = self.clone();
            let function = Arc::downgrade(&strong);
            let executor: BoxedExecutor = Arc::new(FunctionExecutor {
                name: self.name.clone(),
                function,
            });
            let context = ListenerFactoryContext::new(executor, cancel);
            Ok(self.binding.create_listener(context).await?)
        }
        .boxed()
    }

    async fn invoke(
        &self,
        input: TriggeredFunctionData,
        cancel: CancellationToken,
    ) -> FunctionResult {
        let TriggeredFunctionData {
            trigger_value,
            message_session,
            parent_id,
        } = input;
        let context = ValueBindingContext::new(cancel).with_session(message_session);
        let span = info_span!(
            "invocation",
            function = %self.name,
            invocation_id = %context.function_instance_id(),
            parent_id = ?parent_id,
        );

        async move {
            let data = match self.binding.bind(trigger_value, &context).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "Failed to bind trigger value");
                    return FunctionResult::failure(e);
                }
            };

            let binding_data = data.binding_data.unwrap_or_default();
            match self.handler.call(data.value, binding_data).await {
                Ok(()) => {
                    debug!("Function succeeded");
                    FunctionResult::success()
                }
                Err(e) => {
                    let error = format!("{e:#}");
                    warn!(%error, "Function failed");
                    FunctionResult::failure(error)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Executor handed to a listener. Holds its function weakly so the
/// binding → listener → executor chain does not keep itself alive.
struct FunctionExecutor {
    name: String,
    function: Weak<dyn HostedFunction>,
}

#[async_trait]
impl TriggeredFunctionExecutor for FunctionExecutor {
    async fn try_execute(
        &self,
        input: TriggeredFunctionData,
        cancel: CancellationToken,
    ) -> FunctionResult {
        match self.function.upgrade() {
            Some(function) => function.invoke(input, cancel).await,
            None => FunctionResult::failure(format!(
                "function '{}' is no longer registered",
                self.name
            )),
        }
    }
}

// =============================================================================
// TriggerHost
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Created,
    Running,
    Stopped,
}

/// Hosts Service Bus triggered functions.
///
/// Functions are registered before [`start`](Self::start); each gets a
/// trigger binding and, on start, one listener. A host can be started once.
pub struct TriggerHost {
    config: TriggerHostConfig,
    options: Arc<ServiceBusOptions>,
    provider: Arc<MessagingProvider>,
    functions: RwLock<Vec<Arc<dyn HostedFunction>>>,
    state: Mutex<HostState>,
    shutdown: CancellationToken,
}

impl TriggerHost {
    /// Creates a host from `sbtrigger.toml` in the current directory, or
    /// defaults if no configuration can be loaded.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                TriggerHostConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// Creates a host over the in-process broker.
    pub fn from_config(config: &TriggerHostConfig) -> Self {
        Self::from_config_with_transport(config, Arc::new(InMemoryTransport::new()))
    }

    /// Creates a host over `transport`. Initializes logging from the config.
    pub fn from_config_with_transport(
        config: &TriggerHostConfig,
        transport: BoxedTransport,
    ) -> Self {
        logging::init_from_config(&config.logging);

        let options = Arc::new(config.service_bus.clone());
        let provider = Arc::new(MessagingProvider::new(options.clone(), transport.clone()));

        info!(
            transport = transport.name(),
            log_level = %config.logging.level,
            connections = config.connections.len(),
            "Trigger host initialized from configuration"
        );

        Self {
            config: config.clone(),
            options,
            provider,
            functions: RwLock::new(Vec::new()),
            state: Mutex::new(HostState::Created),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &TriggerHostConfig {
        &self.config
    }

    /// The client cache shared by every function.
    pub fn provider(&self) -> &Arc<MessagingProvider> {
        &self.provider
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == HostState::Running
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions
            .read()
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Parameter descriptors of every registered function.
    pub fn descriptors(&self) -> Vec<ServiceBusTriggerParameterDescriptor> {
        self.functions.read().iter().map(|f| f.descriptor()).collect()
    }

    /// The listener of a started function.
    pub fn listener(&self, name: &str) -> Option<Arc<ServiceBusListener>> {
        self.find(name).and_then(|f| f.listener())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a function invoked once per message.
    pub fn register_function<A, H>(
        &self,
        name: impl Into<String>,
        spec: FunctionSpec,
        argument_binding: A,
        handler: H,
    ) -> RuntimeResult<()>
    where
        A: TriggerDataArgumentBinding<ServiceBusMessage> + 'static,
        H: FunctionHandler<A::Value>,
    {
        self.register::<ServiceBusMessage, A>(
            name.into(),
            spec,
            argument_binding,
            Box::new(handler),
        )
    }

    /// Registers a function invoked once per received batch.
    pub fn register_batch_function<A, H>(
        &self,
        name: impl Into<String>,
        spec: FunctionSpec,
        argument_binding: A,
        handler: H,
    ) -> RuntimeResult<()>
    where
        A: TriggerDataArgumentBinding<Vec<ServiceBusMessage>> + 'static,
        H: FunctionHandler<A::Value>,
    {
        self.register::<Vec<ServiceBusMessage>, A>(
            name.into(),
            spec,
            argument_binding,
            Box::new(handler),
        )
    }

    fn register<T, A>(
        &self,
        name: String,
        spec: FunctionSpec,
        argument_binding: A,
        handler: Box<dyn FunctionHandler<A::Value>>,
    ) -> RuntimeResult<()>
    where
        T: TriggerPayload,
        A: TriggerDataArgumentBinding<T> + 'static,
    {
        if *self.state.lock() != HostState::Created {
            return Err(RuntimeError::AlreadyStarted);
        }

        let connection = self.config.connection(&spec.connection)?;
        let account =
            ServiceBusAccount::new(connection, spec.entity_path)?.with_sessions(spec.sessions);
        let binding = ServiceBusTriggerBinding::<T, A>::new(
            spec.parameter_name,
            argument_binding,
            account,
            self.options.clone(),
            self.provider.clone(),
        );

        let mut functions = self.functions.write();
        if functions.iter().any(|f| f.name() == name) {
            return Err(RuntimeError::DuplicateFunction(name));
        }
        info!(
            function = %name,
            entity_path = %binding.account().entity_path(),
            trigger_type = binding.trigger_value_type(),
            sessions = spec.sessions,
            "Registered function"
        );
        functions.push(Arc::new(Registration {
            name,
            binding,
            handler,
        }));
        Ok(())
    }

    fn find(&self, name: &str) -> Option<Arc<dyn HostedFunction>> {
        self.functions.read().iter().find(|f| f.name() == name).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<dyn HostedFunction>> {
        self.functions.read().clone()
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Invokes a function directly with `value`, bypassing its listener.
    pub async fn invoke(
        &self,
        name: &str,
        value: impl Into<TriggerValue>,
    ) -> RuntimeResult<FunctionResult> {
        let function = self
            .find(name)
            .ok_or_else(|| RuntimeError::FunctionNotFound(name.to_string()))?;
        let input = TriggeredFunctionData::new(value.into());
        Ok(function.invoke(input, self.shutdown.child_token()).await)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Creates and starts a listener for every registered function.
    ///
    /// A function whose listener fails to start is logged and skipped.
    pub async fn start(&self) -> RuntimeResult<()> {
        {
            let mut state = self.state.lock();
            if *state != HostState::Created {
                return Err(RuntimeError::AlreadyStarted);
            }
            *state = HostState::Running;
        }

        let functions = self.snapshot();
        info!(functions = functions.len(), "Starting trigger host");

        for function in functions {
            let cancel = self.shutdown.child_token();
            let listener = match function.clone().create_listener(cancel.clone()).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(
                        function = %function.name(),
                        entity_path = %function.entity_path(),
                        error = %e,
                        "Failed to create listener"
                    );
                    continue;
                }
            };
            if let Err(e) = listener.start(cancel).await {
                error!(function = %function.name(), error = %e, "Failed to start listener");
                continue;
            }
            info!(
                function = %function.name(),
                entity_path = %function.entity_path(),
                "Listener started"
            );
        }

        info!("Trigger host started");
        Ok(())
    }

    /// Stops and disposes every listener.
    pub async fn stop(&self) -> RuntimeResult<()> {
        {
            let mut state = self.state.lock();
            if *state != HostState::Running {
                warn!("Trigger host is not running");
                return Ok(());
            }
            *state = HostState::Stopped;
        }

        info!("Stopping trigger host");

        for function in self.snapshot() {
            let Some(listener) = function.listener() else {
                continue;
            };
            if listener.state() == ListenerState::Started
                && let Err(e) = listener.stop(CancellationToken::new()).await
            {
                error!(function = %function.name(), error = %e, "Error stopping listener");
            }
            if let Err(e) = listener.dispose().await {
                error!(function = %function.name(), error = %e, "Error disposing listener");
            }
        }
        self.shutdown.cancel();

        info!("Trigger host stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;

        info!("Trigger host is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;

        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }
}

impl Default for TriggerHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TriggerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerHost")
            .field("functions", &self.function_names())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

/// Waits for shutdown signals (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal as unix_signal};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = wait_for_ctrl_c() => {}
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

// =============================================================================
// HostBuilder
// =============================================================================

/// Builder for a [`TriggerHost`] with custom configuration.
///
/// ```rust,ignore
/// let host = TriggerHost::builder()
///     .config_file("config/sbtrigger.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct HostBuilder {
    config_loader: ConfigLoader,
    transport: Option<BoxedTransport>,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            transport: None,
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: TriggerHostConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `transport` instead of the in-process broker.
    pub fn transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> ConfigResult<TriggerHost> {
        let config = self.config_loader.load()?;
        Ok(match self.transport {
            Some(transport) => TriggerHost::from_config_with_transport(&config, transport),
            None => TriggerHost::from_config(&config),
        })
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    use sbtrigger_core::{BindingValue, ServiceBusTransport};
    use sbtrigger_framework::{BatchArgumentBinding, BindingError, TextArgumentBinding};
    use sbtrigger_transport::EntityOptions;

    use super::*;
    use crate::config::ConfigError;

    const CONN: &str = "Endpoint=sb://host.test/;SharedAccessKeyName=k;SharedAccessKey=v";

    fn config() -> TriggerHostConfig {
        let mut config =
            TriggerHostConfig::default().with_connection(DEFAULT_CONNECTION_NAME, CONN);
        let options = &mut config.service_bus;
        options.message_handler_options.receive_timeout = Duration::from_millis(100);
        options.session_handler_options.message_wait_timeout = Duration::from_millis(100);
        options.batch_options.operation_timeout = Duration::from_millis(100);
        config
    }

    fn host(transport: &Arc<InMemoryTransport>) -> TriggerHost {
        TriggerHost::from_config_with_transport(&config(), transport.clone())
    }

    async fn send(transport: &InMemoryTransport, path: &str, body: &str) {
        transport
            .create_sender(CONN, path)
            .unwrap()
            .send(ServiceBusMessage::from_text(body))
            .await
            .unwrap();
    }

    async fn noop(_body: String, _data: BindingData) -> anyhow::Result<()> {
        Ok(())
    }

    async fn broken(_body: String, _data: BindingData) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for invocation")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_host_delivers_messages_to_function() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.create_queue(CONN, "orders", EntityOptions::default()).unwrap();
        let host = host(&transport);

        let (tx, mut rx) = mpsc::unbounded_channel();
        host.register_function(
            "process-order",
            FunctionSpec::new("orders"),
            TextArgumentBinding,
            move |body: String, _data: BindingData| {
                let tx = tx.clone();
                async move {
                    tx.send(body)?;
                    anyhow::Ok(())
                }
            },
        )
        .unwrap();

        host.start().await.unwrap();
        assert!(host.is_running());
        for body in ["a", "b", "c"] {
            send(&transport, "orders", body).await;
        }

        let mut bodies = vec![next(&mut rx).await, next(&mut rx).await, next(&mut rx).await];
        bodies.sort();
        assert_eq!(bodies, ["a", "b", "c"]);

        host.stop().await.unwrap();
        assert!(!host.is_running());
        assert_eq!(transport.active_message_count(CONN, "orders").unwrap(), 0);
        assert_eq!(transport.locked_message_count(CONN, "orders").unwrap(), 0);
        assert_eq!(
            host.listener("process-order").unwrap().state(),
            ListenerState::Disposed
        );
    }

    #[tokio::test]
    async fn test_failed_function_is_redelivered() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.create_queue(CONN, "orders", EntityOptions::default()).unwrap();
        send(&transport, "orders", "retry me").await;
        let host = host(&transport);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let failures = Arc::new(AtomicUsize::new(1));
        host.register_function(
            "flaky",
            FunctionSpec::new("orders"),
            TextArgumentBinding,
            move |_body: String, data: BindingData| {
                let tx = tx.clone();
                let failures = failures.clone();
                async move {
                    let count = match data.get("DeliveryCount") {
                        Some(BindingValue::Int32(count)) => *count,
                        _ => anyhow::bail!("missing delivery count"),
                    };
                    tx.send(count)?;
                    if failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                        anyhow::bail!("induced failure");
                    }
                    anyhow::Ok(())
                }
            },
        )
        .unwrap();

        host.start().await.unwrap();
        assert_eq!(next(&mut rx).await, 1);
        assert_eq!(next(&mut rx).await, 2);
        host.stop().await.unwrap();

        assert_eq!(transport.active_message_count(CONN, "orders").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_function_receives_bodies() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.create_queue(CONN, "events", EntityOptions::default()).unwrap();
        for body in ["e1", "e2", "e3"] {
            send(&transport, "events", body).await;
        }
        let host = host(&transport);

        let (tx, mut rx) = mpsc::unbounded_channel();
        host.register_batch_function(
            "ingest",
            FunctionSpec::new("events"),
            BatchArgumentBinding::new(TextArgumentBinding),
            move |bodies: Vec<String>, data: BindingData| {
                let tx = tx.clone();
                async move {
                    tx.send((bodies, data.len()))?;
                    anyhow::Ok(())
                }
            },
        )
        .unwrap();

        host.start().await.unwrap();
        let mut received = Vec::new();
        while received.len() < 3 {
            let (bodies, fields) = next(&mut rx).await;
            assert_eq!(fields, 2);
            received.extend(bodies);
        }
        host.stop().await.unwrap();

        assert_eq!(received, ["e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn test_invoke_converts_text() {
        let host = host(&Arc::new(InMemoryTransport::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        host.register_function(
            "echo",
            FunctionSpec::new("orders"),
            TextArgumentBinding,
            move |body: String, _data: BindingData| {
                let tx = tx.clone();
                async move {
                    tx.send(body)?;
                    anyhow::Ok(())
                }
            },
        )
        .unwrap();

        let result = host.invoke("echo", "hello").await.unwrap();
        assert!(result.succeeded);
        assert_eq!(next(&mut rx).await, "hello");

        let result = host
            .invoke("echo", TriggerValue::Texts(vec!["x".into()]))
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert_eq!(
            result.error.as_deref(),
            Some("Unable to convert trigger to ServiceBusMessage.")
        );

        assert!(matches!(
            host.invoke("missing", "hello").await,
            Err(RuntimeError::FunctionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failure() {
        let host = host(&Arc::new(InMemoryTransport::new()));
        host.register_function("broken", FunctionSpec::new("orders"), TextArgumentBinding, broken)
            .unwrap();

        let result = host.invoke("broken", "x").await.unwrap();
        assert_eq!(result, FunctionResult::failure("boom"));
    }

    #[test]
    fn test_registration_errors() {
        let host = host(&Arc::new(InMemoryTransport::new()));

        host.register_function("a", FunctionSpec::new("orders"), TextArgumentBinding, noop)
            .unwrap();
        assert!(matches!(
            host.register_function("a", FunctionSpec::new("other"), TextArgumentBinding, noop),
            Err(RuntimeError::DuplicateFunction(name)) if name == "a"
        ));
        assert!(matches!(
            host.register_function(
                "b",
                FunctionSpec::new("orders").with_connection("Missing"),
                TextArgumentBinding,
                noop,
            ),
            Err(RuntimeError::Config(ConfigError::MissingConnection { .. }))
        ));
        assert!(matches!(
            host.register_function("c", FunctionSpec::new(""), TextArgumentBinding, noop),
            Err(RuntimeError::Binding(BindingError::MissingArgument { .. }))
        ));
        assert_eq!(host.function_names(), ["a"]);
    }

    #[tokio::test]
    async fn test_executor_fails_once_function_is_dropped() {
        let host = host(&Arc::new(InMemoryTransport::new()));
        host.register_function("a", FunctionSpec::new("orders"), TextArgumentBinding, noop)
            .unwrap();

        let strong = host.find("a").unwrap();
        let executor = FunctionExecutor {
            name: "a".into(),
            function: Arc::downgrade(&strong),
        };
        let input = || TriggeredFunctionData::new(TriggerValue::Text("hi".into()));

        let result = executor.try_execute(input(), CancellationToken::new()).await;
        assert!(result.succeeded);

        drop(strong);
        drop(host);
        let result = executor.try_execute(input(), CancellationToken::new()).await;
        assert!(!result.succeeded);
        assert_eq!(
            result.error.as_deref(),
            Some("function 'a' is no longer registered")
        );
    }

    #[test]
    fn test_descriptors() {
        let host = host(&Arc::new(InMemoryTransport::new()));
        host.register_function(
            "a",
            FunctionSpec::new("orders").with_parameter_name("order"),
            TextArgumentBinding,
            noop,
        )
        .unwrap();

        let descriptors = host.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "order");
        assert_eq!(descriptors[0].entity_path, "orders");
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let transport = Arc::new(InMemoryTransport::new());
        let host = host(&transport);

        // Stopping before start is a no-op.
        assert_ok!(host.stop().await);

        host.run_until(async {}).await.unwrap();
        assert!(!host.is_running());

        assert!(matches!(host.start().await, Err(RuntimeError::AlreadyStarted)));
        assert!(matches!(
            host.register_function("late", FunctionSpec::new("orders"), TextArgumentBinding, noop),
            Err(RuntimeError::AlreadyStarted)
        ));
    }
}
