//! # sbtrigger Core
//!
//! Building blocks shared by every sbtrigger crate.
//!
//! ## Foundation Layer
//!
//! - **Messages**: [`ServiceBusMessage`] with broker-assigned [`SystemProperties`],
//!   read through the fallible per-field [`MessageMetadata`] accessors
//! - **Addressing**: [`EntityPath`] (queue or `topic/Subscriptions/name`) and
//!   [`ConnectionString`]
//! - **Binding data**: case-insensitive [`BindingDataContract`] and [`BindingData`]
//!
//! ## Integration Layer
//!
//! - **Clients**: [`MessageReceiver`], [`MessageSession`], [`MessageSender`],
//!   [`EntityClient`]
//! - **Transport factory**: [`ServiceBusTransport`]
//! - **Options**: [`ServiceBusOptions`]
//!
//! ```text
//! ServiceBusTransport ──▶ MessageReceiver / EntityClient ──▶ ServiceBusMessage
//!      (factory)              (lazy clients)                 + SystemProperties
//! ```

pub mod foundation;
pub mod integration;

pub use foundation::{
    BindingData, BindingDataContract, BindingType, BindingValue, CaseInsensitiveMap,
    ConnectionString, DEAD_LETTER_SUFFIX, EntityPath, JSON_CONTENT_TYPE, MessageMetadata,
    PropertyError, PropertyResult, SUBSCRIPTIONS_MARKER, ServiceBusMessage, SystemProperties,
    TEXT_CONTENT_TYPE, TransportError, TransportResult,
};

pub use integration::{
    BatchOptions, BoxedTransport, EntityClient, MessageHandlerOptions, MessageReceiver,
    MessageSender, MessageSession, ServiceBusOptions, ServiceBusTransport, SessionHandlerOptions,
    duration_serde,
};
