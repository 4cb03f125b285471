//! The per-handler trigger binding.
//!
//! One [`ServiceBusTriggerBinding`] is created per registered handler. It owns
//! the converter and contract for the handler's parameter, creates the
//! listener exactly once, and turns every trigger value into the handler
//! argument plus its binding data.

use std::fmt;
use std::sync::{Arc, OnceLock};

use sbtrigger_core::{BindingDataContract, MessageMetadata, ServiceBusOptions};

use crate::account::ServiceBusAccount;
use crate::argument::{TriggerData, TriggerDataArgumentBinding};
use crate::binding_data::{create_binding_data, create_binding_data_contract};
use crate::context::{ListenerFactoryContext, ValueBindingContext};
use crate::converter::{CompositeConverter, ObjectToTypeConverter, TriggerPayload, TriggerValue};
use crate::descriptor::{ServiceBusTriggerParameterDescriptor, create_parameter_display_hints};
use crate::error::{BindingError, BindingResult};
use crate::listener::{ListenerFactory, ServiceBusListener, ServiceBusListenerFactory};
use crate::provider::MessagingProvider;

/// Binds trigger values of payload type `T` through argument binding `A`.
pub struct ServiceBusTriggerBinding<T: TriggerPayload, A> {
    parameter_name: String,
    argument_binding: A,
    account: ServiceBusAccount,
    options: Arc<ServiceBusOptions>,
    provider: Arc<MessagingProvider>,
    converter: CompositeConverter<T>,
    contract: BindingDataContract,
    listener: OnceLock<Arc<ServiceBusListener>>,
}

impl<T, A> ServiceBusTriggerBinding<T, A>
where
    T: TriggerPayload,
    A: TriggerDataArgumentBinding<T>,
{
    pub fn new(
        parameter_name: impl Into<String>,
        argument_binding: A,
        account: ServiceBusAccount,
        options: Arc<ServiceBusOptions>,
        provider: Arc<MessagingProvider>,
    ) -> Self {
        let converter = T::default_converter(argument_binding.parameter_kind());
        let contract = create_binding_data_contract(argument_binding.binding_data_contract());
        Self {
            parameter_name: parameter_name.into(),
            argument_binding,
            account,
            options,
            provider,
            converter,
            contract,
            listener: OnceLock::new(),
        }
    }

    pub fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    pub fn account(&self) -> &ServiceBusAccount {
        &self.account
    }

    /// Name of the payload type trigger values are converted to.
    pub fn trigger_value_type(&self) -> &'static str {
        T::TYPE_NAME
    }

    pub fn binding_data_contract(&self) -> &BindingDataContract {
        &self.contract
    }

    /// The listener, once [`create_listener`](Self::create_listener) has run.
    pub fn listener(&self) -> Option<&Arc<ServiceBusListener>> {
        self.listener.get()
    }

    /// Converts `value` and binds it to the handler argument.
    ///
    /// A missing value fails with [`BindingError::Conversion`] before anything
    /// else runs. Per-message metadata is reported only for single messages.
    pub async fn bind(
        &self,
        value: Option<TriggerValue>,
        context: &ValueBindingContext,
    ) -> BindingResult<TriggerData<A::Value>> {
        let conversion = || BindingError::Conversion {
            target: T::TYPE_NAME,
        };
        let value = value.ok_or_else(conversion)?;
        let payload = self.converter.try_convert(&value).ok_or_else(conversion)?;

        let single = payload.as_single().cloned();
        let bound = self.argument_binding.bind(payload, context).await?;

        let receiver = self.listener.get().and_then(|l| l.receiver());
        let session = context.message_session().cloned();
        let binding_data = create_binding_data(
            single.as_ref().map(|m| m as &dyn MessageMetadata),
            receiver,
            session,
            bound.binding_data.as_ref(),
        );

        Ok(TriggerData {
            value: bound.value,
            binding_data: Some(binding_data),
        })
    }

    /// Creates the listener for this binding. May only succeed once.
    pub async fn create_listener(
        &self,
        context: ListenerFactoryContext,
    ) -> BindingResult<Arc<ServiceBusListener>> {
        let already_created = || BindingError::ListenerAlreadyCreated {
            entity_path: self.account.entity_path().to_string(),
        };
        if self.listener.get().is_some() {
            return Err(already_created());
        }

        let factory = ServiceBusListenerFactory::new(
            self.account.clone(),
            context.executor().clone(),
            self.options.clone(),
            self.provider.clone(),
            !T::IS_BATCH,
        );
        let listener = factory.create(context.cancellation().clone()).await?;
        self.listener
            .set(listener.clone())
            .map_err(|_| already_created())?;
        Ok(listener)
    }

    pub fn to_parameter_descriptor(&self) -> ServiceBusTriggerParameterDescriptor {
        ServiceBusTriggerParameterDescriptor {
            name: self.parameter_name.clone(),
            entity_path: self.account.entity_path().to_string(),
            display_hints: create_parameter_display_hints(self.account.entity_path(), true),
        }
    }
}

impl<T: TriggerPayload, A> fmt::Debug for ServiceBusTriggerBinding<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusTriggerBinding")
            .field("parameter_name", &self.parameter_name)
            .field("trigger_value_type", &T::TYPE_NAME)
            .field("account", &self.account)
            .field("listener", &self.listener.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Deserialize;
    use tokio_util::sync::CancellationToken;

    use sbtrigger_core::{BindingType, BindingValue, ServiceBusMessage, ServiceBusTransport};
    use sbtrigger_transport::{EntityOptions, InMemoryTransport};

    use super::*;
    use crate::argument::{
        BatchArgumentBinding, JsonArgumentBinding, MessageArgumentBinding, TextArgumentBinding,
    };
    use crate::binding_data::{LOCK_TOKEN, MESSAGE_ID, MESSAGE_RECEIVER, SEQUENCE_NUMBER};
    use crate::context::{
        BoxedExecutor, FunctionResult, TriggeredFunctionData, TriggeredFunctionExecutor,
    };
    use crate::converter::ParameterKind;

    const CONN: &str = "Endpoint=sb://trigger.test/;SharedAccessKeyName=k;SharedAccessKey=v";

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        #[serde(rename = "OrderId")]
        order_id: u32,
    }

    struct Noop;

    #[async_trait]
    impl TriggeredFunctionExecutor for Noop {
        async fn try_execute(
            &self,
            _input: TriggeredFunctionData,
            _cancel: CancellationToken,
        ) -> FunctionResult {
            FunctionResult::success()
        }
    }

    /// Counts how often it is asked to bind.
    #[derive(Default)]
    struct CountingBinding(AtomicUsize);

    #[async_trait]
    impl TriggerDataArgumentBinding<ServiceBusMessage> for CountingBinding {
        type Value = ();

        fn parameter_kind(&self) -> ParameterKind {
            ParameterKind::Message
        }

        async fn bind(
            &self,
            _payload: ServiceBusMessage,
            _context: &ValueBindingContext,
        ) -> BindingResult<TriggerData<()>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(TriggerData::new(()))
        }
    }

    fn setup() -> (Arc<InMemoryTransport>, Arc<ServiceBusOptions>, Arc<MessagingProvider>) {
        let transport = Arc::new(InMemoryTransport::new());
        transport.create_queue(CONN, "orders", EntityOptions::default()).unwrap();
        let options = Arc::new(ServiceBusOptions::default());
        let provider = Arc::new(MessagingProvider::new(options.clone(), transport.clone()));
        (transport, options, provider)
    }

    fn make<T: TriggerPayload, A: TriggerDataArgumentBinding<T>>(
        argument: A,
        options: &Arc<ServiceBusOptions>,
        provider: &Arc<MessagingProvider>,
    ) -> ServiceBusTriggerBinding<T, A> {
        ServiceBusTriggerBinding::new(
            "message",
            argument,
            ServiceBusAccount::new(CONN, "orders").unwrap(),
            options.clone(),
            provider.clone(),
        )
    }

    fn listener_context() -> ListenerFactoryContext {
        let executor: BoxedExecutor = Arc::new(Noop);
        ListenerFactoryContext::new(executor, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_null_value_fails_before_binding() {
        let (_, options, provider) = setup();
        let binding = make::<ServiceBusMessage, _>(CountingBinding::default(), &options, &provider);

        let err = binding
            .bind(None, &ValueBindingContext::default())
            .await
            .err()
            .unwrap();
        assert_eq!(
            err,
            BindingError::Conversion {
                target: "ServiceBusMessage"
            }
        );
        assert_eq!(binding.argument_binding.0.load(Ordering::SeqCst), 0);
        assert_eq!(err.to_string(), "Unable to convert trigger to ServiceBusMessage.");
    }

    #[tokio::test]
    async fn test_wrong_shape_is_conversion_error() {
        let (_, options, provider) = setup();
        let binding = make::<ServiceBusMessage, _>(MessageArgumentBinding, &options, &provider);

        let result = binding
            .bind(
                Some(TriggerValue::Messages(vec![])),
                &ValueBindingContext::default(),
            )
            .await;
        assert!(matches!(result, Err(BindingError::Conversion { .. })));
    }

    #[tokio::test]
    async fn test_text_binds_through_json_argument() {
        let (_, options, provider) = setup();
        let mut declared = BindingDataContract::new();
        declared.insert("OrderId", BindingType::Json);
        let argument = JsonArgumentBinding::<Order>::new().with_contract(declared);
        let binding = make::<ServiceBusMessage, _>(argument, &options, &provider);

        assert_eq!(binding.binding_data_contract().len(), 16);

        let bound = binding
            .bind(
                Some(r#"{"OrderId":12}"#.into()),
                &ValueBindingContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(bound.value, Order { order_id: 12 });

        let data = bound.binding_data.unwrap();
        assert_eq!(data.get("orderid"), Some(&BindingValue::Json(serde_json::json!(12))));
        assert_eq!(data.get(LOCK_TOKEN), Some(&BindingValue::String(String::new())));
        assert!(!data.contains_key(SEQUENCE_NUMBER));
        assert!(data.get(MESSAGE_RECEIVER).unwrap().is_null());
    }

    #[tokio::test]
    async fn test_received_message_reports_metadata_and_receiver() {
        let (transport, options, provider) = setup();
        let binding = make::<ServiceBusMessage, _>(TextArgumentBinding, &options, &provider);
        let listener = binding.create_listener(listener_context()).await.unwrap();

        transport
            .create_sender(CONN, "orders")
            .unwrap()
            .send(ServiceBusMessage::from_text("hello").with_message_id("m-7"))
            .await
            .unwrap();
        let receiver = listener.receiver().unwrap();
        let message = receiver.receive(1, Duration::ZERO).await.unwrap().remove(0);

        let bound = binding
            .bind(
                Some(TriggerValue::Message(message)),
                &ValueBindingContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(bound.value, "hello");

        let data = bound.binding_data.unwrap();
        assert_eq!(data.len(), 15);
        assert_eq!(data.get(MESSAGE_ID), Some(&"m-7".into()));
        assert!(!data.get(LOCK_TOKEN).unwrap().as_str().unwrap().is_empty());
        let bound_receiver = data.get(MESSAGE_RECEIVER).unwrap().as_receiver().unwrap();
        assert!(Arc::ptr_eq(bound_receiver, &receiver));
    }

    #[tokio::test]
    async fn test_batch_has_no_message_metadata() {
        let (_, options, provider) = setup();
        let binding = make::<Vec<ServiceBusMessage>, _>(
            BatchArgumentBinding::new(TextArgumentBinding),
            &options,
            &provider,
        );
        assert_eq!(binding.trigger_value_type(), "ServiceBusMessage[]");

        let batch = vec![
            ServiceBusMessage::from_text("a").with_message_id("1"),
            ServiceBusMessage::from_text("b").with_message_id("2"),
        ];
        let bound = binding
            .bind(
                Some(TriggerValue::Messages(batch)),
                &ValueBindingContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(bound.value, vec!["a".to_string(), "b".to_string()]);
        let data = bound.binding_data.unwrap();
        assert_eq!(data.len(), 2);
        assert!(!data.contains_key(MESSAGE_ID));
    }

    #[tokio::test]
    async fn test_listener_created_once() {
        let (_, options, provider) = setup();
        let binding = make::<ServiceBusMessage, _>(MessageArgumentBinding, &options, &provider);
        assert!(binding.listener().is_none());

        let listener = binding.create_listener(listener_context()).await.unwrap();
        assert!(Arc::ptr_eq(binding.listener().unwrap(), &listener));

        let second = binding.create_listener(listener_context()).await;
        assert!(matches!(
            second,
            Err(BindingError::ListenerAlreadyCreated { ref entity_path }) if entity_path == "orders"
        ));
    }

    #[test]
    fn test_parameter_descriptor() {
        let (_, options, provider) = setup();
        let binding = make::<ServiceBusMessage, _>(MessageArgumentBinding, &options, &provider);

        let descriptor = binding.to_parameter_descriptor();
        assert_eq!(descriptor.name, "message");
        assert_eq!(descriptor.entity_path, "orders");
        assert_eq!(descriptor.display_hints.description, "dequeue from 'orders'");
        assert_eq!(binding.trigger_value_type(), "ServiceBusMessage");
    }
}
