//! Foundation layer - message model and addressing.
//!
//! - Message model with per-field metadata accessors
//! - Entity path and connection string parsing
//! - Binding-data maps and values
//! - Transport and property errors

pub mod binding;
pub mod connection;
pub mod entity;
pub mod error;
pub mod message;

pub use binding::{BindingData, BindingDataContract, BindingType, BindingValue, CaseInsensitiveMap};
pub use connection::ConnectionString;
pub use entity::{DEAD_LETTER_SUFFIX, EntityPath, SUBSCRIPTIONS_MARKER};
pub use error::{PropertyError, PropertyResult, TransportError, TransportResult};
pub use message::{
    JSON_CONTENT_TYPE, MessageMetadata, ServiceBusMessage, SystemProperties, TEXT_CONTENT_TYPE,
};
