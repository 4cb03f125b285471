//! # sbtrigger
//!
//! Service Bus triggered functions for Rust.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────────────┐     ┌──────────┐
//! │ TriggerHost │────▶│   Listener   │────▶│ ServiceBusTrigger-    │────▶│ Handler  │
//! │  (runtime)  │     │ (pump, lock) │     │ Binding (convert,     │     │ (user fn)│
//! └─────────────┘     └──────────────┘     │ bind, binding data)   │     └──────────┘
//!        │                   ▲              └───────────────────────┘
//!        ▼                   │
//!  MessagingProvider ── cached receivers / entity clients ── ServiceBusTransport
//! ```
//!
//! - **Host**: registers functions, starts one listener per function
//! - **Listener**: receives messages (single, batch or per session) and
//!   settles them from the invocation result
//! - **Trigger binding**: converts the trigger value, binds the handler
//!   argument and extracts per-message binding data
//! - **Provider**: process-lifetime cache of clients keyed by entity path
//!   and connection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sbtrigger::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host = TriggerHost::new();
//!
//!     host.register_function(
//!         "audit",
//!         FunctionSpec::new("events/Subscriptions/audit"),
//!         TextArgumentBinding,
//!         |body: String, data: BindingData| async move {
//!             info!(%body, fields = data.len(), "Audit event");
//!             anyhow::Ok(())
//!         },
//!     )?;
//!
//!     host.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: load `sbtrigger.toml` (default)
//! - `yaml-config`: load `sbtrigger.yaml`
//! - `json-log`: JSON log output

pub use sbtrigger_core as core;
pub use sbtrigger_framework as framework;
pub use sbtrigger_runtime as runtime;
pub use sbtrigger_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use sbtrigger::prelude::*;
/// ```
pub mod prelude {
    // Host - main entry point
    pub use sbtrigger_runtime::{FunctionSpec, TriggerHost, TriggerHostConfig};

    // Argument bindings - handler parameter shapes
    pub use sbtrigger_framework::{
        BatchArgumentBinding, BytesArgumentBinding, JsonArgumentBinding, MessageArgumentBinding,
        TextArgumentBinding, TriggerValue,
    };

    // Messages and binding data
    pub use sbtrigger_core::{BindingData, BindingValue, MessageMetadata, ServiceBusMessage};

    // Logging macros
    pub use sbtrigger_runtime::prelude::*;
}
