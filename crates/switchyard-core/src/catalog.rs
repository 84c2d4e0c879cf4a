//! Catalog value types.
//!
//! Upstream listings are read with [`list_items`], which skips malformed
//! entries instead of failing the whole listing. Absent optional fields
//! default to `None`/empty.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::schema::SimpleSchema;

/// A tool as listed by an upstream (`tools/list`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolItem {
    /// Upstream-local tool name.
    pub name: String,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw JSON Schema for the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// A resource as listed by an upstream (`resources/list`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceItem {
    /// Resource URI.
    pub uri: String,
    /// Short name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A declared prompt argument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    #[serde(default)]
    pub required: bool,
}

/// A prompt as listed by an upstream (`prompts/list`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptItem {
    /// Prompt name.
    pub name: String,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared arguments.
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// Read the array under `key` of a listing result, skipping entries that do
/// not deserialize. A missing or non-array key yields an empty list.
pub fn list_items<T: DeserializeOwned>(result: &Value, key: &str) -> Vec<T> {
    let Some(items) = result.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(key, error = %e, "skipping malformed listing entry");
                None
            }
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool calls
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a tool call, as returned to clients.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content parts, passed through unchanged from the upstream.
    #[serde(default)]
    pub content: Vec<Value>,
    /// Whether the call failed.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": text.into() })],
            is_error: false,
        }
    }

    /// A failed single-text result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": text.into() })],
            is_error: true,
        }
    }

    /// Read an upstream `tools/call` result. A result without `content` is
    /// treated as empty rather than rejected.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// Flatten the content into one string: text parts verbatim, other parts
    /// as JSON, joined with newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|part| match (part.get("type").and_then(Value::as_str), part.get("text")) {
                (Some("text"), Some(Value::String(text))) => text.clone(),
                _ => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Executes a tool once its arguments have been validated.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool. Failures are reported inside the result, never thrown.
    async fn call(&self, arguments: Map<String, Value>) -> ToolCallResult;
}

/// A tool in the merged catalog.
#[derive(Clone)]
pub struct ToolSpec {
    /// Catalog name (namespaced unless the mapping hides the prefix).
    pub name: String,
    /// Display title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Simplified argument schema.
    pub input_schema: SimpleSchema,
    /// Delegate that performs the call.
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("title", &self.title)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    /// Validate required arguments, then delegate to the handler.
    ///
    /// A call missing required fields never reaches the handler.
    pub async fn call(&self, arguments: Map<String, Value>) -> ToolCallResult {
        let missing = self.input_schema.missing_required(&arguments);
        if !missing.is_empty() {
            return ToolCallResult::error(format!(
                "Missing required arguments: {}",
                missing.join(", ")
            ));
        }
        self.handler.call(arguments).await
    }

    /// Public descriptor with the schema translated to standard JSON Schema.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.to_json_schema(),
        }
    }
}

/// Serializable view of a [`ToolSpec`] (`tools/list`, `/api/tools`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Catalog name.
    pub name: String,
    /// Display title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Standard JSON Schema.
    pub input_schema: Value,
}
