//! LLM-facing tool definitions and parameter-schema normalization.
//!
//! Everything a tool server says about its tools is untrusted input. Before a
//! definition reaches the catalog the name is trimmed and checked, the
//! description is bounded, and the parameter schema is coerced into a
//! top-level object schema that always carries `type` and `properties`,
//! because LLM function-calling APIs reject anything else.

use super::ToolRegistryDomainError;
use crate::truncate::truncate_chars;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Default cap on tool description length.
pub const DEFAULT_DESCRIPTION_LIMIT: usize = 1024;

/// A callable tool as presented to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    name: String,
    description: String,
    parameters: Value,
}

impl ToolDefinition {
    /// Builds a definition from server-supplied fields.
    ///
    /// A missing description becomes an empty string; an over-long one is
    /// truncated to `description_limit` characters. The schema is passed
    /// through [`normalize_parameter_schema`].
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyToolName`] when the name is
    /// empty after trimming.
    pub fn from_untrusted(
        name: &str,
        description: Option<&str>,
        schema: Option<Value>,
        description_limit: usize,
    ) -> Result<Self, ToolRegistryDomainError> {
        let normalized_name = name.trim();
        if normalized_name.is_empty() {
            return Err(ToolRegistryDomainError::EmptyToolName);
        }

        let normalized_description = description.map_or_else(String::new, |text| {
            truncate_chars(text.trim(), description_limit).into_owned()
        });

        Ok(Self {
            name: normalized_name.to_owned(),
            description: normalized_description,
            parameters: normalize_parameter_schema(schema),
        })
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the bounded description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the normalized parameter schema.
    #[must_use]
    pub const fn parameters(&self) -> &Value {
        &self.parameters
    }
}

/// Returns the schema used when a server supplies nothing usable.
#[must_use]
pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Coerces an untrusted parameter schema into a well-formed object schema.
///
/// - absent, non-object, or non-`object`-typed schemas become
///   `{"type": "object", "properties": {}}`;
/// - a missing `type` is filled with `"object"`;
/// - missing or malformed `properties` become `{}`;
/// - `required` keeps only string entries naming a declared property and is
///   dropped when nothing survives.
#[must_use]
pub fn normalize_parameter_schema(schema: Option<Value>) -> Value {
    let Some(Value::Object(mut object)) = schema else {
        return empty_object_schema();
    };

    match object.get("type") {
        None => {
            object.insert("type".to_owned(), Value::String("object".to_owned()));
        }
        Some(Value::String(kind)) if kind == "object" => {}
        Some(_) => return empty_object_schema(),
    }

    if !matches!(object.get("properties"), Some(Value::Object(_))) {
        object.insert("properties".to_owned(), Value::Object(Map::new()));
    }

    let required = object.remove("required");
    if let Some(Value::Array(entries)) = required {
        let declared = object.get("properties").and_then(Value::as_object);
        let kept: Vec<Value> = entries
            .into_iter()
            .filter(|entry| {
                entry
                    .as_str()
                    .is_some_and(|key| declared.is_some_and(|props| props.contains_key(key)))
            })
            .collect();
        if !kept.is_empty() {
            object.insert("required".to_owned(), Value::Array(kept));
        }
    }

    Value::Object(object)
}
