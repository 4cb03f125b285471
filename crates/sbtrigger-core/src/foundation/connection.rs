//! Connection string parsing.
//!
//! Service Bus connection strings are `;`-separated `Key=Value` pairs, e.g.
//! `Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=root;SharedAccessKey=...`.
//! Keys are matched case-insensitively.

use std::collections::HashMap;

use super::error::{TransportError, TransportResult};

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    endpoint: String,
    properties: HashMap<String, String>,
}

impl ConnectionString {
    /// Parses a connection string. `Endpoint` is required.
    pub fn parse(raw: &str) -> TransportResult<Self> {
        let mut properties = HashMap::new();
        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                return Err(TransportError::invalid_config(format!(
                    "malformed connection string segment '{part}'"
                )));
            };
            properties.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let endpoint = properties
            .get("endpoint")
            .filter(|e| !e.is_empty())
            .cloned()
            .ok_or_else(|| TransportError::invalid_config("connection string has no Endpoint"))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            properties,
        })
    }

    /// The namespace endpoint, without a trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Looks up any other key, case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn shared_access_key_name(&self) -> Option<&str> {
        self.get("SharedAccessKeyName")
    }

    /// Entity path embedded in an entity-scoped connection string.
    pub fn entity_path(&self) -> Option<&str> {
        self.get("EntityPath")
    }
}
