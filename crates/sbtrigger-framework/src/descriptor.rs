//! Parameter descriptors reported to dashboards and invocation tooling.

use serde::Serialize;

/// Display hints for a bound parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDisplayHints {
    pub description: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// Describes a trigger parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBusTriggerParameterDescriptor {
    pub name: String,
    pub entity_path: String,
    pub display_hints: ParameterDisplayHints,
}

/// Builds display hints for a trigger (`is_input`) or an output parameter.
pub fn create_parameter_display_hints(entity_path: &str, is_input: bool) -> ParameterDisplayHints {
    if is_input {
        ParameterDisplayHints {
            description: format!("dequeue from '{entity_path}'"),
            prompt: "Enter the queue message body".to_string(),
            default_value: None,
        }
    } else {
        ParameterDisplayHints {
            description: format!("enqueue to '{entity_path}'"),
            prompt: "Enter the output entity name".to_string(),
            default_value: Some(entity_path.to_string()),
        }
    }
}
