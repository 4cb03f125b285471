//! Binding-data contract and per-message metadata extraction.
//!
//! Every trigger binding exposes the same fixed set of message fields, plus
//! whatever its argument binding contributes from the message body. Field
//! names are matched case-insensitively.

use std::sync::Arc;

use tracing::debug;

use sbtrigger_core::{
    BindingData, BindingDataContract, BindingType, BindingValue, MessageMetadata,
    MessageReceiver, MessageSession, PropertyResult,
};

pub const DELIVERY_COUNT: &str = "DeliveryCount";
pub const DEAD_LETTER_SOURCE: &str = "DeadLetterSource";
pub const LOCK_TOKEN: &str = "LockToken";
pub const EXPIRES_AT_UTC: &str = "ExpiresAtUtc";
pub const ENQUEUED_TIME_UTC: &str = "EnqueuedTimeUtc";
pub const MESSAGE_ID: &str = "MessageId";
pub const CONTENT_TYPE: &str = "ContentType";
pub const REPLY_TO: &str = "ReplyTo";
pub const SEQUENCE_NUMBER: &str = "SequenceNumber";
pub const TO: &str = "To";
pub const LABEL: &str = "Label";
pub const CORRELATION_ID: &str = "CorrelationId";
pub const USER_PROPERTIES: &str = "UserProperties";
pub const MESSAGE_RECEIVER: &str = "MessageReceiver";
pub const MESSAGE_SESSION: &str = "MessageSession";

/// The fixed fields every trigger binding declares, in declaration order.
pub const FIXED_FIELDS: [(&str, BindingType); 15] = [
    (DELIVERY_COUNT, BindingType::Int32),
    (DEAD_LETTER_SOURCE, BindingType::String),
    (LOCK_TOKEN, BindingType::String),
    (EXPIRES_AT_UTC, BindingType::DateTime),
    (ENQUEUED_TIME_UTC, BindingType::DateTime),
    (MESSAGE_ID, BindingType::String),
    (CONTENT_TYPE, BindingType::String),
    (REPLY_TO, BindingType::String),
    (SEQUENCE_NUMBER, BindingType::Int64),
    (TO, BindingType::String),
    (LABEL, BindingType::String),
    (CORRELATION_ID, BindingType::String),
    (USER_PROPERTIES, BindingType::Properties),
    (MESSAGE_RECEIVER, BindingType::MessageReceiver),
    (MESSAGE_SESSION, BindingType::MessageSession),
];

/// Builds the contract: the fixed fields overlaid with `extra`.
///
/// Entries in `extra` win on a (case-insensitive) name collision.
pub fn create_binding_data_contract(extra: Option<&BindingDataContract>) -> BindingDataContract {
    let mut contract: BindingDataContract = FIXED_FIELDS.iter().copied().collect();
    if let Some(extra) = extra {
        contract.overlay(extra);
    }
    contract
}

/// Extracts binding data for one message.
///
/// Each field is read on its own; a field whose accessor fails is left out
/// while the rest are still reported. `MessageReceiver` and `MessageSession`
/// are always present. Fields in `from_value_type` overwrite same-named
/// entries.
pub fn create_binding_data(
    message: Option<&dyn MessageMetadata>,
    receiver: Option<Arc<dyn MessageReceiver>>,
    session: Option<Arc<dyn MessageSession>>,
    from_value_type: Option<&BindingData>,
) -> BindingData {
    let mut data = BindingData::new();

    if let Some(message) = message {
        extract_message_fields(message, &mut data);
    }

    data.insert(
        MESSAGE_RECEIVER,
        receiver.map_or(BindingValue::Null, BindingValue::Receiver),
    );
    data.insert(
        MESSAGE_SESSION,
        session.map_or(BindingValue::Null, BindingValue::Session),
    );

    if let Some(from_value_type) = from_value_type {
        data.overlay(from_value_type);
    }
    data
}

fn extract_message_fields(message: &dyn MessageMetadata, data: &mut BindingData) {
    let lock_token = if message.is_lock_token_set() {
        message.lock_token()
    } else {
        Ok(String::new())
    };

    put(data, DELIVERY_COUNT, message.delivery_count());
    put(data, DEAD_LETTER_SOURCE, message.dead_letter_source());
    put(data, LOCK_TOKEN, lock_token);
    put(data, EXPIRES_AT_UTC, message.expires_at_utc());
    put(data, ENQUEUED_TIME_UTC, message.enqueued_time_utc());
    put(data, MESSAGE_ID, message.message_id());
    put(data, CONTENT_TYPE, message.content_type());
    put(data, REPLY_TO, message.reply_to());
    put(data, SEQUENCE_NUMBER, message.sequence_number());
    put(data, TO, message.to());
    put(data, LABEL, message.label());
    put(data, CORRELATION_ID, message.correlation_id());
    put(data, USER_PROPERTIES, message.user_properties().cloned());
}

fn put<V: Into<BindingValue>>(
    data: &mut BindingData,
    field: &'static str,
    value: PropertyResult<V>,
) {
    match value {
        Ok(value) => {
            data.insert(field, value.into());
        }
        Err(err) => debug!(field, error = %err, "Binding data field unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use sbtrigger_core::{PropertyError, ServiceBusMessage, SystemProperties};

    use super::*;

    fn enqueued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn received_message() -> ServiceBusMessage {
        let token = Uuid::parse_str("6d3c1a52-8f1e-4b52-9d0c-3a8a3c1f0f11").unwrap();
        ServiceBusMessage::from_text("payload")
            .with_message_id("m-1")
            .with_content_type("text/plain")
            .with_reply_to("replies")
            .with_to("orders")
            .with_label("created")
            .with_correlation_id("c-9")
            .with_time_to_live(Duration::from_secs(60))
            .with_user_property("tenant", "contoso")
            .with_system_properties(
                SystemProperties::new(42, enqueued())
                    .with_delivery_count(3)
                    .with_lock_token(token)
                    .with_dead_letter_source("orders"),
            )
    }

    /// Delegates to a message but fails one accessor.
    struct FailingMessageId(ServiceBusMessage);

    impl MessageMetadata for FailingMessageId {
        fn delivery_count(&self) -> PropertyResult<i32> {
            self.0.delivery_count()
        }
        fn dead_letter_source(&self) -> PropertyResult<Option<&str>> {
            self.0.dead_letter_source()
        }
        fn is_lock_token_set(&self) -> bool {
            self.0.is_lock_token_set()
        }
        fn lock_token(&self) -> PropertyResult<String> {
            self.0.lock_token()
        }
        fn expires_at_utc(&self) -> PropertyResult<DateTime<Utc>> {
            self.0.expires_at_utc()
        }
        fn enqueued_time_utc(&self) -> PropertyResult<DateTime<Utc>> {
            self.0.enqueued_time_utc()
        }
        fn sequence_number(&self) -> PropertyResult<i64> {
            self.0.sequence_number()
        }
        fn message_id(&self) -> PropertyResult<Option<&str>> {
            Err(PropertyError::unavailable("MessageId", "decoder failure"))
        }
        fn content_type(&self) -> PropertyResult<Option<&str>> {
            self.0.content_type()
        }
        fn reply_to(&self) -> PropertyResult<Option<&str>> {
            self.0.reply_to()
        }
        fn to(&self) -> PropertyResult<Option<&str>> {
            self.0.to()
        }
        fn label(&self) -> PropertyResult<Option<&str>> {
            self.0.label()
        }
        fn correlation_id(&self) -> PropertyResult<Option<&str>> {
            self.0.correlation_id()
        }
        fn user_properties(&self) -> PropertyResult<&HashMap<String, serde_json::Value>> {
            self.0.user_properties()
        }
    }

    #[test]
    fn test_contract_has_fixed_fields() {
        let contract = create_binding_data_contract(None);

        assert_eq!(contract.len(), 15);
        for (name, ty) in FIXED_FIELDS {
            assert_eq!(contract.get(name), Some(&ty), "{name}");
        }
        assert_eq!(contract.get("deliverycount"), Some(&BindingType::Int32));
    }

    #[test]
    fn test_contract_extra_overrides() {
        let extra: BindingDataContract = [
            ("messageid", BindingType::Json),
            ("OrderId", BindingType::Json),
        ]
        .into_iter()
        .collect();

        let contract = create_binding_data_contract(Some(&extra));
        assert_eq!(contract.len(), 16);
        assert_eq!(contract.get(MESSAGE_ID), Some(&BindingType::Json));
        assert_eq!(contract.get("orderid"), Some(&BindingType::Json));
    }

    #[test]
    fn test_all_fields_extracted() {
        let message = received_message();
        let data = create_binding_data(Some(&message), None, None, None);

        assert_eq!(data.len(), 15);
        assert_eq!(data.get(DELIVERY_COUNT), Some(&BindingValue::Int32(3)));
        assert_eq!(data.get(DEAD_LETTER_SOURCE), Some(&"orders".into()));
        assert_eq!(
            data.get(LOCK_TOKEN),
            Some(&"6d3c1a52-8f1e-4b52-9d0c-3a8a3c1f0f11".into())
        );
        assert_eq!(
            data.get(EXPIRES_AT_UTC),
            Some(&BindingValue::DateTime(enqueued() + chrono::Duration::seconds(60)))
        );
        assert_eq!(data.get(ENQUEUED_TIME_UTC), Some(&BindingValue::DateTime(enqueued())));
        assert_eq!(data.get(MESSAGE_ID), Some(&"m-1".into()));
        assert_eq!(data.get(CONTENT_TYPE), Some(&"text/plain".into()));
        assert_eq!(data.get(REPLY_TO), Some(&"replies".into()));
        assert_eq!(data.get(SEQUENCE_NUMBER), Some(&BindingValue::Int64(42)));
        assert_eq!(data.get(TO), Some(&"orders".into()));
        assert_eq!(data.get(LABEL), Some(&"created".into()));
        assert_eq!(data.get(CORRELATION_ID), Some(&"c-9".into()));
        assert_eq!(
            data.get(USER_PROPERTIES)
                .and_then(|v| v.as_properties())
                .and_then(|p| p.get("tenant")),
            Some(&serde_json::json!("contoso"))
        );
        assert!(data.get(MESSAGE_RECEIVER).unwrap().is_null());
        assert!(data.get(MESSAGE_SESSION).unwrap().is_null());
    }

    #[test]
    fn test_failing_accessor_omits_only_that_field() {
        let message = FailingMessageId(received_message());
        let data = create_binding_data(Some(&message), None, None, None);

        assert_eq!(data.len(), 14);
        assert!(!data.contains_key(MESSAGE_ID));
        assert_eq!(data.get(CORRELATION_ID), Some(&"c-9".into()));
        assert_eq!(data.get(SEQUENCE_NUMBER), Some(&BindingValue::Int64(42)));
    }

    #[test]
    fn test_missing_lock_token_is_empty_string() {
        let message = ServiceBusMessage::from_text("x")
            .with_system_properties(SystemProperties::new(1, enqueued()));
        let data = create_binding_data(Some(&message), None, None, None);

        assert_eq!(data.get(LOCK_TOKEN), Some(&BindingValue::String(String::new())));
        assert!(data.get(MESSAGE_ID).unwrap().is_null());
        assert!(data.get(DEAD_LETTER_SOURCE).unwrap().is_null());
    }

    #[test]
    fn test_unreceived_message_reports_only_local_fields() {
        let message = ServiceBusMessage::from_text("x").with_message_id("local");
        let data = create_binding_data(Some(&message), None, None, None);

        assert!(!data.contains_key(SEQUENCE_NUMBER));
        assert!(!data.contains_key(DELIVERY_COUNT));
        assert_eq!(data.get(MESSAGE_ID), Some(&"local".into()));
        assert_eq!(data.get(LOCK_TOKEN), Some(&BindingValue::String(String::new())));
    }

    #[test]
    fn test_value_type_fields_override() {
        let message = received_message();
        let from_value: BindingData = [
            ("messageId", BindingValue::Json(serde_json::json!("from-body"))),
            ("OrderId", BindingValue::Json(serde_json::json!(7))),
        ]
        .into_iter()
        .collect();

        let data = create_binding_data(Some(&message), None, None, Some(&from_value));
        assert_eq!(
            data.get(MESSAGE_ID),
            Some(&BindingValue::Json(serde_json::json!("from-body")))
        );
        assert_eq!(data.get("orderid"), Some(&BindingValue::Json(serde_json::json!(7))));
    }

    #[test]
    fn test_no_message_still_has_handles() {
        let data = create_binding_data(None, None, None, None);

        assert_eq!(data.len(), 2);
        assert!(data.contains_key(MESSAGE_RECEIVER));
        assert!(data.contains_key(MESSAGE_SESSION));
    }
}
