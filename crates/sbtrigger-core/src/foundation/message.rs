//! The broker message model.
//!
//! A [`ServiceBusMessage`] carries an opaque body, a set of sender-controlled
//! properties and, once it has been received from an entity, the
//! broker-assigned [`SystemProperties`]. Broker-assigned values are read through
//! the [`MessageMetadata`] accessors, each of which can fail independently.

use std::collections::HashMap;
use std::str::Utf8Error;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::{PropertyError, PropertyResult};

/// Content type stamped on messages whose body is JSON.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type stamped on messages whose body is plain text.
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

// =============================================================================
// System Properties
// =============================================================================

/// Properties assigned by the broker when a message is accepted and delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProperties {
    /// Unique, monotonically increasing number assigned at enqueue time.
    pub sequence_number: i64,
    /// Number of times the message has been handed to a receiver.
    pub delivery_count: i32,
    /// Time the broker accepted the message.
    pub enqueued_time: DateTime<Utc>,
    /// Lock held by the receiver. `None` in receive-and-delete mode.
    pub lock_token: Option<Uuid>,
    /// Entity the message was dead-lettered from, when read from a dead-letter queue.
    pub dead_letter_source: Option<String>,
    /// Time the current lock expires.
    pub locked_until: Option<DateTime<Utc>>,
}

impl SystemProperties {
    /// Creates properties for a message delivered for the first time.
    pub fn new(sequence_number: i64, enqueued_time: DateTime<Utc>) -> Self {
        Self {
            sequence_number,
            delivery_count: 1,
            enqueued_time,
            lock_token: None,
            dead_letter_source: None,
            locked_until: None,
        }
    }

    /// Sets the lock token.
    pub fn with_lock_token(mut self, token: Uuid) -> Self {
        self.lock_token = Some(token);
        self
    }

    /// Sets the delivery count.
    pub fn with_delivery_count(mut self, count: i32) -> Self {
        self.delivery_count = count;
        self
    }

    /// Sets the dead-letter source.
    pub fn with_dead_letter_source(mut self, source: impl Into<String>) -> Self {
        self.dead_letter_source = Some(source.into());
        self
    }
}

// =============================================================================
// Message
// =============================================================================

/// A message as sent to or received from a queue or subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceBusMessage {
    body: Vec<u8>,
    /// Application-defined identifier.
    pub message_id: Option<String>,
    /// MIME content type of the body.
    pub content_type: Option<String>,
    /// Correlation identifier for request/reply patterns.
    pub correlation_id: Option<String>,
    /// Application-specific label (subject).
    pub label: Option<String>,
    /// Forwarding destination.
    pub to: Option<String>,
    /// Reply destination.
    pub reply_to: Option<String>,
    /// Session the message belongs to, for session-enabled entities.
    pub session_id: Option<String>,
    /// Relative lifetime; `None` means the message never expires.
    pub time_to_live: Option<Duration>,
    /// Application properties.
    pub user_properties: HashMap<String, serde_json::Value>,
    system_properties: Option<SystemProperties>,
}

impl ServiceBusMessage {
    /// Creates a message with the given body.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Creates a message whose body is the UTF-8 encoding of `text`.
    pub fn from_text(text: impl AsRef<str>) -> Self {
        Self::new(text.as_ref().as_bytes())
    }

    /// Creates a JSON message from a serializable value.
    pub fn from_json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(body).with_content_type(JSON_CONTENT_TYPE))
    }

    /// Returns the message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the message, returning the body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Interprets the body as UTF-8 text.
    pub fn body_text(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the forwarding destination.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Sets the reply destination.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the time to live.
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Adds an application property.
    pub fn with_user_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.user_properties.insert(key.into(), value.into());
        self
    }

    /// Attaches broker-assigned properties. Used by transports on delivery.
    pub fn with_system_properties(mut self, properties: SystemProperties) -> Self {
        self.system_properties = Some(properties);
        self
    }

    /// Returns the broker-assigned properties, if the message was received.
    pub fn system_properties(&self) -> Option<&SystemProperties> {
        self.system_properties.as_ref()
    }

    /// Returns a mutable reference to the broker-assigned properties.
    pub fn system_properties_mut(&mut self) -> Option<&mut SystemProperties> {
        self.system_properties.as_mut()
    }

    /// Whether the message was delivered by a broker.
    pub fn is_received(&self) -> bool {
        self.system_properties.is_some()
    }

    /// Returns a copy without broker-assigned state, suitable for re-sending.
    pub fn clone_for_send(&self) -> Self {
        Self {
            system_properties: None,
            ..self.clone()
        }
    }

    fn received(&self, property: &'static str) -> PropertyResult<&SystemProperties> {
        self.system_properties
            .as_ref()
            .ok_or(PropertyError::NotReceived { property })
    }
}

// =============================================================================
// Per-field accessors
// =============================================================================

/// Read access to the metadata fields exposed to triggered functions.
///
/// Every accessor is independent: a failure in one never prevents reading the
/// others.
pub trait MessageMetadata: Send + Sync {
    /// Number of delivery attempts.
    fn delivery_count(&self) -> PropertyResult<i32>;

    /// Entity the message was dead-lettered from.
    fn dead_letter_source(&self) -> PropertyResult<Option<&str>>;

    /// Whether the message carries a lock token.
    fn is_lock_token_set(&self) -> bool;

    /// The lock token, formatted as a hyphenated UUID.
    fn lock_token(&self) -> PropertyResult<String>;

    /// Absolute expiry time: enqueued time plus time to live.
    fn expires_at_utc(&self) -> PropertyResult<DateTime<Utc>>;

    /// Time the broker accepted the message.
    fn enqueued_time_utc(&self) -> PropertyResult<DateTime<Utc>>;

    /// Broker-assigned sequence number.
    fn sequence_number(&self) -> PropertyResult<i64>;

    fn message_id(&self) -> PropertyResult<Option<&str>>;

    fn content_type(&self) -> PropertyResult<Option<&str>>;

    fn reply_to(&self) -> PropertyResult<Option<&str>>;

    fn to(&self) -> PropertyResult<Option<&str>>;

    fn label(&self) -> PropertyResult<Option<&str>>;

    fn correlation_id(&self) -> PropertyResult<Option<&str>>;

    fn user_properties(&self) -> PropertyResult<&HashMap<String, serde_json::Value>>;
}

impl MessageMetadata for ServiceBusMessage {
    fn delivery_count(&self) -> PropertyResult<i32> {
        Ok(self.received("DeliveryCount")?.delivery_count)
    }

    fn dead_letter_source(&self) -> PropertyResult<Option<&str>> {
        Ok(self
            .received("DeadLetterSource")?
            .dead_letter_source
            .as_deref())
    }

    fn is_lock_token_set(&self) -> bool {
        self.system_properties
            .as_ref()
            .is_some_and(|p| p.lock_token.is_some())
    }

    fn lock_token(&self) -> PropertyResult<String> {
        self.received("LockToken")?
            .lock_token
            .map(|token| token.to_string())
            .ok_or_else(|| PropertyError::unavailable("LockToken", "message was not locked"))
    }

    fn expires_at_utc(&self) -> PropertyResult<DateTime<Utc>> {
        let enqueued = self.received("ExpiresAtUtc")?.enqueued_time;
        let Some(ttl) = self.time_to_live else {
            return Ok(DateTime::<Utc>::MAX_UTC);
        };
        // Saturates instead of overflowing for very long lifetimes.
        Ok(chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| enqueued.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    fn enqueued_time_utc(&self) -> PropertyResult<DateTime<Utc>> {
        Ok(self.received("EnqueuedTimeUtc")?.enqueued_time)
    }

    fn sequence_number(&self) -> PropertyResult<i64> {
        Ok(self.received("SequenceNumber")?.sequence_number)
    }

    fn message_id(&self) -> PropertyResult<Option<&str>> {
        Ok(self.message_id.as_deref())
    }

    fn content_type(&self) -> PropertyResult<Option<&str>> {
        Ok(self.content_type.as_deref())
    }

    fn reply_to(&self) -> PropertyResult<Option<&str>> {
        Ok(self.reply_to.as_deref())
    }

    fn to(&self) -> PropertyResult<Option<&str>> {
        Ok(self.to.as_deref())
    }

    fn label(&self) -> PropertyResult<Option<&str>> {
        Ok(self.label.as_deref())
    }

    fn correlation_id(&self) -> PropertyResult<Option<&str>> {
        Ok(self.correlation_id.as_deref())
    }

    fn user_properties(&self) -> PropertyResult<&HashMap<String, serde_json::Value>> {
        Ok(&self.user_properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn enqueued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_system_properties_require_receive() {
        let msg = ServiceBusMessage::from_text("hello").with_message_id("m-1");

        assert!(!msg.is_received());
        assert_eq!(
            msg.delivery_count(),
            Err(PropertyError::NotReceived {
                property: "DeliveryCount"
            })
        );
        assert!(msg.sequence_number().is_err());
        assert!(msg.enqueued_time_utc().is_err());
        assert!(!msg.is_lock_token_set());
        assert_eq!(msg.message_id(), Ok(Some("m-1")));
    }

    #[test]
    fn test_received_accessors() {
        let token = Uuid::new_v4();
        let msg = ServiceBusMessage::from_text("hello").with_system_properties(
            SystemProperties::new(42, enqueued())
                .with_lock_token(token)
                .with_delivery_count(3),
        );

        assert_eq!(msg.sequence_number(), Ok(42));
        assert_eq!(msg.delivery_count(), Ok(3));
        assert!(msg.is_lock_token_set());
        assert_eq!(msg.lock_token(), Ok(token.to_string()));
        assert_eq!(msg.dead_letter_source(), Ok(None));
    }

    #[test]
    fn test_lock_token_unset_on_received_message() {
        let msg = ServiceBusMessage::new(Vec::new())
            .with_system_properties(SystemProperties::new(1, enqueued()));

        assert!(!msg.is_lock_token_set());
        assert!(matches!(
            msg.lock_token(),
            Err(PropertyError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_expires_at_adds_ttl() {
        let msg = ServiceBusMessage::from_text("x")
            .with_time_to_live(Duration::from_secs(90))
            .with_system_properties(SystemProperties::new(1, enqueued()));

        assert_eq!(
            msg.expires_at_utc(),
            Ok(enqueued() + chrono::Duration::seconds(90))
        );
    }

    #[test]
    fn test_expires_at_saturates() {
        let msg = ServiceBusMessage::from_text("x")
            .with_time_to_live(Duration::from_secs(u64::MAX))
            .with_system_properties(SystemProperties::new(1, enqueued()));
        assert_eq!(msg.expires_at_utc(), Ok(DateTime::<Utc>::MAX_UTC));

        let never = ServiceBusMessage::from_text("x")
            .with_system_properties(SystemProperties::new(1, enqueued()));
        assert_eq!(never.expires_at_utc(), Ok(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_from_json_sets_content_type() {
        let msg = ServiceBusMessage::from_json(&serde_json::json!({ "id": 7 })).unwrap();

        assert_eq!(msg.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
        assert_eq!(msg.body_text().unwrap(), r#"{"id":7}"#);
    }

    #[test]
    fn test_clone_for_send_drops_system_properties() {
        let msg = ServiceBusMessage::from_text("x")
            .with_label("l")
            .with_system_properties(SystemProperties::new(5, enqueued()));
        let copy = msg.clone_for_send();

        assert!(!copy.is_received());
        assert_eq!(copy.label.as_deref(), Some("l"));
        assert_eq!(copy.body(), msg.body());
    }
}
