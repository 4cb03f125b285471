//! Transport implementations for sbtrigger.
//!
//! - [`memory`]: an in-process broker implementing
//!   [`ServiceBusTransport`](sbtrigger_core::ServiceBusTransport), used for
//!   local runs and tests

pub mod memory;

pub use memory::{
    EntityOptions, InMemoryEntityClient, InMemoryReceiver, InMemorySender, InMemorySession,
    InMemoryTransport,
};
