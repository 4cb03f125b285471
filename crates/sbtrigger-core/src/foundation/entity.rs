//! Entity addressing.
//!
//! Queues are addressed by name. Subscriptions are addressed as
//! `{topic}/Subscriptions/{subscription}`.

use std::fmt;

use super::error::{TransportError, TransportResult};

/// Separator between a topic name and a subscription name.
pub const SUBSCRIPTIONS_MARKER: &str = "/Subscriptions/";

/// Suffix addressing the dead-letter sub-queue of an entity.
pub const DEAD_LETTER_SUFFIX: &str = "/$DeadLetterQueue";

/// A parsed entity path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityPath {
    /// A queue, addressed by its full path.
    Queue(String),
    /// A subscription of a topic.
    Subscription {
        /// Topic name.
        topic: String,
        /// Subscription name.
        subscription: String,
    },
}

impl EntityPath {
    /// Parses a path.
    ///
    /// The path is split on [`SUBSCRIPTIONS_MARKER`]. Exactly two segments
    /// address a subscription; any other count addresses a queue named by the
    /// whole, unmodified path.
    pub fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path.split(SUBSCRIPTIONS_MARKER).collect();
        match segments.as_slice() {
            [topic, subscription] => Self::Subscription {
                topic: (*topic).to_string(),
                subscription: (*subscription).to_string(),
            },
            _ => Self::Queue(path.to_string()),
        }
    }

    /// Parses a path, rejecting paths that contain the marker more than once.
    pub fn parse_strict(path: &str) -> TransportResult<Self> {
        if marker_count(path) > 1 {
            return Err(TransportError::invalid_config(format!(
                "entity path '{path}' contains '{SUBSCRIPTIONS_MARKER}' more than once"
            )));
        }
        Ok(Self::parse(path))
    }

    /// Formats a subscription path.
    pub fn subscription_path(topic: &str, subscription: &str) -> String {
        format!("{topic}{SUBSCRIPTIONS_MARKER}{subscription}")
    }

    /// Formats the dead-letter sub-queue path of `path`.
    pub fn dead_letter_path(path: &str) -> String {
        format!("{path}{DEAD_LETTER_SUFFIX}")
    }

    /// Whether this is a queue.
    pub fn is_queue(&self) -> bool {
        matches!(self, Self::Queue(_))
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(name) => f.write_str(name),
            Self::Subscription {
                topic,
                subscription,
            } => write!(f, "{topic}{SUBSCRIPTIONS_MARKER}{subscription}"),
        }
    }
}

/// Number of subscription markers in `path`.
fn marker_count(path: &str) -> usize {
    path.matches(SUBSCRIPTIONS_MARKER).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_path() {
        assert_eq!(EntityPath::parse("orders"), EntityPath::Queue("orders".into()));
    }

    #[test]
    fn test_subscription_path() {
        assert_eq!(
            EntityPath::parse("orders/Subscriptions/billing"),
            EntityPath::Subscription {
                topic: "orders".into(),
                subscription: "billing".into(),
            }
        );
    }

    #[test]
    fn test_multiple_markers_fall_back_to_queue() {
        let path = "a/Subscriptions/b/Subscriptions/c";
        assert_eq!(EntityPath::parse(path), EntityPath::Queue(path.into()));
        assert!(EntityPath::parse_strict(path).is_err());
    }

    #[test]
    fn test_marker_is_case_sensitive() {
        let path = "orders/subscriptions/billing";
        assert_eq!(EntityPath::parse(path), EntityPath::Queue(path.into()));
    }

    #[test]
    fn test_display_round_trips_subscription() {
        let path = EntityPath::subscription_path("t", "s");
        assert_eq!(path, "t/Subscriptions/s");
        assert_eq!(EntityPath::parse(&path).to_string(), path);
        assert_eq!(EntityPath::dead_letter_path("q"), "q/$DeadLetterQueue");
    }
}
