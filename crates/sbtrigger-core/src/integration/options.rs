//! Options governing client creation and message pumping.
//!
//! All types deserialize with serde and fall back to defaults for missing
//! fields. Durations are written as `"30s"`, `"500ms"`, `"5m"` or a bare number
//! of seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Service Bus options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceBusOptions {
    /// Prefetch count applied to receivers and entity clients.
    pub prefetch_count: u32,

    /// Options for non-session message pumps.
    pub message_handler_options: MessageHandlerOptions,

    /// Options for session pumps.
    pub session_handler_options: SessionHandlerOptions,

    /// Options for batch dispatch.
    pub batch_options: BatchOptions,

    /// Reject entity paths containing the subscription marker more than once
    /// instead of treating them as queue names.
    pub strict_entity_paths: bool,
}

impl Default for ServiceBusOptions {
    fn default() -> Self {
        Self {
            prefetch_count: 0,
            message_handler_options: MessageHandlerOptions::default(),
            session_handler_options: SessionHandlerOptions::default(),
            batch_options: BatchOptions::default(),
            strict_entity_paths: false,
        }
    }
}

impl ServiceBusOptions {
    /// Sets the prefetch count.
    pub fn with_prefetch_count(mut self, count: u32) -> Self {
        self.prefetch_count = count;
        self
    }

    /// Sets the message handler options.
    pub fn with_message_handler_options(mut self, options: MessageHandlerOptions) -> Self {
        self.message_handler_options = options;
        self
    }

    /// Sets the session handler options.
    pub fn with_session_handler_options(mut self, options: SessionHandlerOptions) -> Self {
        self.session_handler_options = options;
        self
    }

    /// Sets the batch options.
    pub fn with_batch_options(mut self, options: BatchOptions) -> Self {
        self.batch_options = options;
        self
    }

    /// Enables strict entity path validation.
    pub fn with_strict_entity_paths(mut self, strict: bool) -> Self {
        self.strict_entity_paths = strict;
        self
    }
}

/// Options for the non-session message pump.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessageHandlerOptions {
    /// Complete messages automatically after a successful invocation.
    pub auto_complete: bool,

    /// Maximum number of concurrent invocations.
    pub max_concurrent_calls: usize,

    /// Maximum duration over which message locks are renewed. Passed through
    /// to the transport, which owns lock renewal; the pumps never read it.
    #[serde(with = "duration_serde")]
    pub max_auto_renew_duration: Duration,

    /// Wait per receive call before polling again.
    #[serde(with = "duration_serde")]
    pub receive_timeout: Duration,
}

impl Default for MessageHandlerOptions {
    fn default() -> Self {
        Self {
            auto_complete: true,
            max_concurrent_calls: default_max_concurrent_calls(),
            max_auto_renew_duration: default_auto_renew(),
            receive_timeout: Duration::from_secs(60),
        }
    }
}

/// Options for session pumps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionHandlerOptions {
    /// Complete messages automatically after a successful invocation.
    pub auto_complete: bool,

    /// Maximum number of sessions processed concurrently.
    pub max_concurrent_sessions: usize,

    /// Idle time after which a session is released.
    #[serde(with = "duration_serde")]
    pub message_wait_timeout: Duration,

    /// Maximum duration over which session locks are renewed. Passed through
    /// to the transport like the message handler's.
    #[serde(with = "duration_serde")]
    pub max_auto_renew_duration: Duration,
}

impl Default for SessionHandlerOptions {
    fn default() -> Self {
        Self {
            auto_complete: true,
            max_concurrent_sessions: 2000,
            message_wait_timeout: Duration::from_secs(60),
            max_auto_renew_duration: default_auto_renew(),
        }
    }
}

/// Options for batch dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchOptions {
    /// Largest batch handed to one invocation.
    pub max_message_count: usize,

    /// Wait for the first message of a batch.
    #[serde(with = "duration_serde")]
    pub operation_timeout: Duration,

    /// Complete the whole batch after a successful invocation.
    pub auto_complete: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_message_count: 1000,
            operation_timeout: Duration::from_secs(60),
            auto_complete: true,
        }
    }
}

fn default_max_concurrent_calls() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    16 * cpus
}

fn default_auto_renew() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Serde module for human-readable durations.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }

    /// Parses `"500ms"`, `"30s"`, `"5m"`, `"1h"` or a bare number of seconds.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let parse = |n: &str| n.trim().parse::<u64>().map_err(|e| format!("'{s}': {e}"));
        let scaled = |n: &str, factor: u64| {
            parse(n)?
                .checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("'{s}': duration overflows"))
        };

        // "ms" must be checked before "m" and "s".
        if let Some(ms) = s.strip_suffix("ms") {
            parse(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            parse(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(hours, 3600)
        } else {
            parse(s).map(Duration::from_secs)
        }
    }
}
