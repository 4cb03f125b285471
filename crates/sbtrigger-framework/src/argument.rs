//! Argument bindings: turning a converted payload into the handler's value.
//!
//! The trigger binding converts the raw trigger value into a message (or a
//! batch); an argument binding then produces the value the handler declared,
//! together with any binding data it can derive from the body.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use sbtrigger_core::{BindingData, BindingDataContract, BindingValue, ServiceBusMessage};

use crate::context::ValueBindingContext;
use crate::converter::ParameterKind;
use crate::error::{BindingError, BindingResult};

/// Value handed to the host for one invocation.
#[derive(Debug, Clone)]
pub struct TriggerData<V> {
    /// The handler argument.
    pub value: V,
    /// Binding data: metadata plus value-type fields.
    pub binding_data: Option<BindingData>,
}

impl<V> TriggerData<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            binding_data: None,
        }
    }

    pub fn with_binding_data(mut self, binding_data: BindingData) -> Self {
        self.binding_data = Some(binding_data);
        self
    }
}

/// Binds a converted payload `T` to a handler value.
#[async_trait]
pub trait TriggerDataArgumentBinding<T: Send + 'static>: Send + Sync {
    type Value: Send + 'static;

    /// Shape of the handler parameter, used to pick a converter.
    fn parameter_kind(&self) -> ParameterKind;

    /// Fields this binding contributes beyond the fixed ones.
    fn binding_data_contract(&self) -> Option<&BindingDataContract> {
        None
    }

    /// Produces the handler value and its value-type binding data.
    async fn bind(
        &self,
        payload: T,
        context: &ValueBindingContext,
    ) -> BindingResult<TriggerData<Self::Value>>;
}

// =============================================================================
// Single-message bindings
// =============================================================================

/// Binds the message itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageArgumentBinding;

#[async_trait]
impl TriggerDataArgumentBinding<ServiceBusMessage> for MessageArgumentBinding {
    type Value = ServiceBusMessage;

    fn parameter_kind(&self) -> ParameterKind {
        ParameterKind::Message
    }

    async fn bind(
        &self,
        payload: ServiceBusMessage,
        _context: &ValueBindingContext,
    ) -> BindingResult<TriggerData<ServiceBusMessage>> {
        Ok(TriggerData::new(payload))
    }
}

/// Binds the body decoded as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextArgumentBinding;

#[async_trait]
impl TriggerDataArgumentBinding<ServiceBusMessage> for TextArgumentBinding {
    type Value = String;

    fn parameter_kind(&self) -> ParameterKind {
        ParameterKind::Text
    }

    async fn bind(
        &self,
        payload: ServiceBusMessage,
        _context: &ValueBindingContext,
    ) -> BindingResult<TriggerData<String>> {
        let text = String::from_utf8(payload.into_body())
            .map_err(|e| BindingError::deserialize("String", e))?;
        Ok(TriggerData::new(text))
    }
}

/// Binds the raw body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesArgumentBinding;

#[async_trait]
impl TriggerDataArgumentBinding<ServiceBusMessage> for BytesArgumentBinding {
    type Value = Vec<u8>;

    fn parameter_kind(&self) -> ParameterKind {
        ParameterKind::Bytes
    }

    async fn bind(
        &self,
        payload: ServiceBusMessage,
        _context: &ValueBindingContext,
    ) -> BindingResult<TriggerData<Vec<u8>>> {
        Ok(TriggerData::new(payload.into_body()))
    }
}

/// Deserializes the body as JSON into `P`.
///
/// When the body is a JSON object its top-level members are also reported as
/// binding data, so handlers can route on body fields by name.
pub struct JsonArgumentBinding<P> {
    contract: Option<BindingDataContract>,
    _marker: PhantomData<fn() -> P>,
}

impl<P> JsonArgumentBinding<P> {
    pub fn new() -> Self {
        Self {
            contract: None,
            _marker: PhantomData,
        }
    }

    /// Declares the body fields handlers may rely on.
    pub fn with_contract(mut self, contract: BindingDataContract) -> Self {
        self.contract = Some(contract);
        self
    }
}

impl<P> Default for JsonArgumentBinding<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for JsonArgumentBinding<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonArgumentBinding")
            .field("target", &type_name::<P>())
            .field("contract", &self.contract)
            .finish()
    }
}

#[async_trait]
impl<P> TriggerDataArgumentBinding<ServiceBusMessage> for JsonArgumentBinding<P>
where
    P: DeserializeOwned + Send + 'static,
{
    type Value = P;

    fn parameter_kind(&self) -> ParameterKind {
        ParameterKind::Json
    }

    fn binding_data_contract(&self) -> Option<&BindingDataContract> {
        self.contract.as_ref()
    }

    async fn bind(
        &self,
        payload: ServiceBusMessage,
        _context: &ValueBindingContext,
    ) -> BindingResult<TriggerData<P>> {
        let target = type_name::<P>();
        let json: serde_json::Value = serde_json::from_slice(payload.body())
            .map_err(|e| BindingError::deserialize(target, e))?;

        let binding_data = match &json {
            serde_json::Value::Object(members) => Some(
                members
                    .iter()
                    .map(|(k, v)| (k.clone(), BindingValue::Json(v.clone())))
                    .collect::<BindingData>(),
            ),
            _ => None,
        };

        let value =
            serde_json::from_value(json).map_err(|e| BindingError::deserialize(target, e))?;
        Ok(TriggerData {
            value,
            binding_data,
        })
    }
}

// =============================================================================
// Batch binding
// =============================================================================

/// Maps an element binding over every message of a batch.
///
/// Element binding data is discarded; a batch has no single message to
/// describe.
#[derive(Debug, Clone, Default)]
pub struct BatchArgumentBinding<B> {
    element: B,
}

impl<B> BatchArgumentBinding<B> {
    pub fn new(element: B) -> Self {
        Self { element }
    }

    pub fn element(&self) -> &B {
        &self.element
    }
}

#[async_trait]
impl<B> TriggerDataArgumentBinding<Vec<ServiceBusMessage>> for BatchArgumentBinding<B>
where
    B: TriggerDataArgumentBinding<ServiceBusMessage>,
{
    type Value = Vec<B::Value>;

    fn parameter_kind(&self) -> ParameterKind {
        self.element.parameter_kind()
    }

    async fn bind(
        &self,
        payload: Vec<ServiceBusMessage>,
        context: &ValueBindingContext,
    ) -> BindingResult<TriggerData<Vec<B::Value>>> {
        let mut values = Vec::with_capacity(payload.len());
        for message in payload {
            values.push(self.element.bind(message, context).await?.value);
        }
        Ok(TriggerData::new(values))
    }
}
