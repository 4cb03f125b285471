//! Integration layer - broker client interfaces and options.

pub mod client;
pub mod options;

pub use client::{
    BoxedTransport, EntityClient, MessageReceiver, MessageSender, MessageSession,
    ServiceBusTransport,
};
pub use options::{
    BatchOptions, MessageHandlerOptions, ServiceBusOptions, SessionHandlerOptions, duration_serde,
};
