//! # sbtrigger Framework
//!
//! Trigger binding and listener lifecycle for Service Bus triggered functions.
//!
//! This layer provides:
//! - A process-lifetime client cache keyed by entity path and connection
//! - Conversion of raw trigger values into messages or batches
//! - The binding-data contract and per-message metadata extraction
//! - The per-handler trigger binding with a write-once listener
//! - Listeners that pump messages into the host's executor and settle them
//!
//! The host side is only seen through [`TriggeredFunctionExecutor`].

pub mod account;
pub mod argument;
pub mod binding_data;
pub mod context;
pub mod converter;
pub mod descriptor;
pub mod error;
pub mod listener;
pub mod processor;
pub mod provider;
pub mod trigger;

pub use account::ServiceBusAccount;
pub use argument::{
    BatchArgumentBinding, BytesArgumentBinding, JsonArgumentBinding, MessageArgumentBinding,
    TextArgumentBinding, TriggerData, TriggerDataArgumentBinding,
};
pub use binding_data::{FIXED_FIELDS, create_binding_data, create_binding_data_contract};
pub use context::{
    BoxedExecutor, FunctionResult, ListenerFactoryContext, TriggeredFunctionData,
    TriggeredFunctionExecutor, ValueBindingContext,
};
pub use converter::{
    CompositeConverter, IdentityConverter, ObjectToTypeConverter, ParameterKind,
    StringToMessageConverter, TriggerPayload, TriggerValue,
};
pub use descriptor::{
    ParameterDisplayHints, ServiceBusTriggerParameterDescriptor, create_parameter_display_hints,
};
pub use error::{BindingError, BindingResult};
pub use listener::{ListenerFactory, ListenerState, ServiceBusListener, ServiceBusListenerFactory};
pub use processor::{MessageProcessor, SessionMessageProcessor};
pub use provider::{ClientKey, MessagingProvider};
pub use trigger::ServiceBusTriggerBinding;
