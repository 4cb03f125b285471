//! The broker account a trigger listens on.

use crate::error::{BindingResult, require_non_empty};

/// Connection string, entity path and session flag for one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBusAccount {
    connection_string: String,
    entity_path: String,
    sessions_enabled: bool,
}

impl ServiceBusAccount {
    /// Fails with [`BindingError::MissingArgument`](crate::BindingError::MissingArgument)
    /// if either value is empty.
    pub fn new(
        connection_string: impl Into<String>,
        entity_path: impl Into<String>,
    ) -> BindingResult<Self> {
        let connection_string = connection_string.into();
        let entity_path = entity_path.into();
        require_non_empty(&connection_string, "connection_string")?;
        require_non_empty(&entity_path, "entity_path")?;

        Ok(Self {
            connection_string,
            entity_path,
            sessions_enabled: false,
        })
    }

    pub fn with_sessions(mut self, enabled: bool) -> Self {
        self.sessions_enabled = enabled;
        self
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    pub fn sessions_enabled(&self) -> bool {
        self.sessions_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BindingError;

    #[test]
    fn test_rejects_empty_values() {
        assert_eq!(
            ServiceBusAccount::new("", "orders").unwrap_err(),
            BindingError::MissingArgument {
                name: "connection_string"
            }
        );
        assert_eq!(
            ServiceBusAccount::new("Endpoint=sb://x/", "").unwrap_err(),
            BindingError::MissingArgument {
                name: "entity_path"
            }
        );
    }

    #[test]
    fn test_sessions_flag() {
        let account = ServiceBusAccount::new("Endpoint=sb://x/", "orders")
            .unwrap()
            .with_sessions(true);

        assert!(account.sessions_enabled());
        assert_eq!(account.entity_path(), "orders");
    }
}
