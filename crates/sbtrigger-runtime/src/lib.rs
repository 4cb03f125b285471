//! sbtrigger Runtime - hosting layer for Service Bus triggered functions.
//!
//! This crate provides:
//! - The trigger host (`TriggerHost`): function registration, one listener
//!   per function, and the execution pipeline behind each listener
//! - Layered configuration (`config`): defaults, `sbtrigger.toml` /
//!   `sbtrigger.yaml`, `SBTRIGGER_*` environment variables
//! - Logging setup (`logging`)
//!
//! ```ignore
//! use sbtrigger_runtime::{FunctionSpec, TriggerHost};
//! use sbtrigger_framework::JsonArgumentBinding;
//!
//! #[derive(serde::Deserialize)]
//! struct Order { id: u64 }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host = TriggerHost::builder().profile("production").build()?;
//!
//!     host.register_function(
//!         "process-order",
//!         FunctionSpec::new("orders/Subscriptions/billing"),
//!         JsonArgumentBinding::<Order>::new(),
//!         |order: Order, _data| async move {
//!             tracing::info!(order_id = order.id, "Processing order");
//!             anyhow::Ok(())
//!         },
//!     )?;
//!
//!     // Run until Ctrl+C
//!     host.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod logging;

// Re-exports
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, LoggingConfig, TriggerHostConfig, load_config,
    load_config_from_file,
};
pub use error::{RuntimeError, RuntimeResult};
pub use host::{FunctionHandler, FunctionSpec, HandlerFuture, HostBuilder, TriggerHost};
pub use logging::{LoggingBuilder, SpanEvents};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
