//! Conversion of raw trigger values into the trigger payload type.
//!
//! A trigger value arrives either as a broker message (or batch of them) or as
//! text supplied by a caller that invokes a function directly. Converters turn
//! it into the payload the trigger binding works with; a
//! [`CompositeConverter`] tries its strategies in order and the first hit wins.

use serde::de::IgnoredAny;

use sbtrigger_core::{JSON_CONTENT_TYPE, ServiceBusMessage, TEXT_CONTENT_TYPE};

/// A raw value handed to a trigger binding.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerValue {
    Message(ServiceBusMessage),
    Messages(Vec<ServiceBusMessage>),
    Text(String),
    Texts(Vec<String>),
}

impl From<ServiceBusMessage> for TriggerValue {
    fn from(message: ServiceBusMessage) -> Self {
        Self::Message(message)
    }
}

impl From<Vec<ServiceBusMessage>> for TriggerValue {
    fn from(messages: Vec<ServiceBusMessage>) -> Self {
        Self::Messages(messages)
    }
}

impl From<String> for TriggerValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for TriggerValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Shape of the handler parameter a message is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// The message itself.
    Message,
    /// The body decoded as UTF-8.
    Text,
    /// The raw body.
    Bytes,
    /// The body deserialized from JSON.
    Json,
}

/// Attempts to convert a raw trigger value to `T`.
pub trait ObjectToTypeConverter<T>: Send + Sync {
    /// Returns `None` when this converter does not apply.
    fn try_convert(&self, value: &TriggerValue) -> Option<T>;
}

// =============================================================================
// Strategies
// =============================================================================

/// Passes messages through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConverter;

impl ObjectToTypeConverter<ServiceBusMessage> for IdentityConverter {
    fn try_convert(&self, value: &TriggerValue) -> Option<ServiceBusMessage> {
        match value {
            TriggerValue::Message(message) => Some(message.clone()),
            _ => None,
        }
    }
}

impl ObjectToTypeConverter<Vec<ServiceBusMessage>> for IdentityConverter {
    fn try_convert(&self, value: &TriggerValue) -> Option<Vec<ServiceBusMessage>> {
        match value {
            TriggerValue::Messages(messages) => Some(messages.clone()),
            _ => None,
        }
    }
}

/// Wraps text in a message whose body is its UTF-8 encoding.
///
/// For [`ParameterKind::Json`] the text must parse as JSON and the message is
/// stamped with a JSON content type; for [`ParameterKind::Text`] it is stamped
/// as plain text.
#[derive(Debug, Clone, Copy)]
pub struct StringToMessageConverter {
    kind: ParameterKind,
}

impl StringToMessageConverter {
    pub fn new(kind: ParameterKind) -> Self {
        Self { kind }
    }

    fn convert_one(&self, text: &str) -> Option<ServiceBusMessage> {
        let message = ServiceBusMessage::from_text(text);
        match self.kind {
            ParameterKind::Json => {
                serde_json::from_str::<IgnoredAny>(text).ok()?;
                Some(message.with_content_type(JSON_CONTENT_TYPE))
            }
            ParameterKind::Text => Some(message.with_content_type(TEXT_CONTENT_TYPE)),
            ParameterKind::Message | ParameterKind::Bytes => Some(message),
        }
    }
}

impl ObjectToTypeConverter<ServiceBusMessage> for StringToMessageConverter {
    fn try_convert(&self, value: &TriggerValue) -> Option<ServiceBusMessage> {
        match value {
            TriggerValue::Text(text) => self.convert_one(text),
            _ => None,
        }
    }
}

impl ObjectToTypeConverter<Vec<ServiceBusMessage>> for StringToMessageConverter {
    fn try_convert(&self, value: &TriggerValue) -> Option<Vec<ServiceBusMessage>> {
        match value {
            TriggerValue::Texts(texts) => texts.iter().map(|t| self.convert_one(t)).collect(),
            _ => None,
        }
    }
}

/// Tries converters in registration order.
pub struct CompositeConverter<T> {
    converters: Vec<Box<dyn ObjectToTypeConverter<T>>>,
}

impl<T> Default for CompositeConverter<T> {
    fn default() -> Self {
        Self {
            converters: Vec::new(),
        }
    }
}

impl<T> CompositeConverter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a converter.
    pub fn with(mut self, converter: impl ObjectToTypeConverter<T> + 'static) -> Self {
        self.converters.push(Box::new(converter));
        self
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl<T> ObjectToTypeConverter<T> for CompositeConverter<T> {
    fn try_convert(&self, value: &TriggerValue) -> Option<T> {
        self.converters.iter().find_map(|c| c.try_convert(value))
    }
}

// =============================================================================
// Trigger payloads
// =============================================================================

/// A payload type a trigger binding can be declared over: one message, or a
/// batch of them.
pub trait TriggerPayload: Clone + Send + Sync + 'static {
    /// Name reported as the trigger value type.
    const TYPE_NAME: &'static str;

    /// Whether the listener should dispatch batches.
    const IS_BATCH: bool;

    /// Identity first, then text.
    fn default_converter(kind: ParameterKind) -> CompositeConverter<Self>;

    /// The single message whose metadata is reported, if any.
    fn as_single(&self) -> Option<&ServiceBusMessage>;
}

impl TriggerPayload for ServiceBusMessage {
    const TYPE_NAME: &'static str = "ServiceBusMessage";
    const IS_BATCH: bool = false;

    fn default_converter(kind: ParameterKind) -> CompositeConverter<Self> {
        CompositeConverter::new()
            .with(IdentityConverter)
            .with(StringToMessageConverter::new(kind))
    }

    fn as_single(&self) -> Option<&ServiceBusMessage> {
        Some(self)
    }
}

impl TriggerPayload for Vec<ServiceBusMessage> {
    const TYPE_NAME: &'static str = "ServiceBusMessage[]";
    const IS_BATCH: bool = true;

    fn default_converter(kind: ParameterKind) -> CompositeConverter<Self> {
        CompositeConverter::new()
            .with(IdentityConverter)
            .with(StringToMessageConverter::new(kind))
    }

    fn as_single(&self) -> Option<&ServiceBusMessage> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_returns_message_unchanged() {
        let message = ServiceBusMessage::from_text("body").with_message_id("id-1");
        let converter = ServiceBusMessage::default_converter(ParameterKind::Message);

        let converted = converter.try_convert(&TriggerValue::Message(message.clone()));
        assert_eq!(converted, Some(message));
    }

    #[test]
    fn test_text_converts_to_message() {
        let converter = ServiceBusMessage::default_converter(ParameterKind::Text);

        let converted = converter.try_convert(&"hello".into()).unwrap();
        assert_eq!(converted.body_text().unwrap(), "hello");
        assert_eq!(converted.content_type.as_deref(), Some(TEXT_CONTENT_TYPE));
    }

    #[test]
    fn test_json_text_must_parse() {
        let converter = ServiceBusMessage::default_converter(ParameterKind::Json);

        let ok = converter.try_convert(&r#"{"orderId":1}"#.into()).unwrap();
        assert_eq!(ok.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
        assert_eq!(converter.try_convert(&"not json".into()), None);
    }

    #[test]
    fn test_unconvertible_shape_fails() {
        let single = ServiceBusMessage::default_converter(ParameterKind::Message);
        assert_eq!(single.try_convert(&TriggerValue::Messages(vec![])), None);
        assert_eq!(single.try_convert(&TriggerValue::Texts(vec!["a".into()])), None);

        let batch = Vec::<ServiceBusMessage>::default_converter(ParameterKind::Message);
        assert_eq!(
            batch.try_convert(&TriggerValue::Message(ServiceBusMessage::default())),
            None
        );
    }

    #[test]
    fn test_batch_text_preserves_order() {
        let converter = Vec::<ServiceBusMessage>::default_converter(ParameterKind::Bytes);
        let texts = TriggerValue::Texts(vec!["a".into(), "b".into(), "c".into()]);

        let converted = converter.try_convert(&texts).unwrap();
        let bodies: Vec<_> = converted.iter().map(|m| m.body_text().unwrap()).collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_batch_fails_if_any_element_fails() {
        let converter = Vec::<ServiceBusMessage>::default_converter(ParameterKind::Json);
        let texts = TriggerValue::Texts(vec!["1".into(), "{".into()]);
        assert_eq!(converter.try_convert(&texts), None);
    }

    #[test]
    fn test_composite_first_match_wins() {
        struct Fixed(&'static str);
        impl ObjectToTypeConverter<ServiceBusMessage> for Fixed {
            fn try_convert(&self, _: &TriggerValue) -> Option<ServiceBusMessage> {
                Some(ServiceBusMessage::from_text(self.0))
            }
        }

        let converter = CompositeConverter::new().with(Fixed("first")).with(Fixed("second"));
        let converted = converter.try_convert(&"x".into()).unwrap();
        assert_eq!(converted.body_text().unwrap(), "first");
        assert_eq!(converter.len(), 2);
    }
}
