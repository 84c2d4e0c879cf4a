//! Schema reconciliation.
//!
//! Upstreams describe tool inputs with arbitrary JSON Schema. The gateway
//! keeps a reduced shape (`properties` mapped to four primitive kinds plus
//! `required`) that it can validate against and translate back into a
//! standard schema for `tools/list`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// Version of the manual fallback table below. Bump when entries change.
pub const MANUAL_SCHEMA_TABLE_VERSION: u32 = 1;

/// Metric name for fallback usage (counter, labels: tool).
pub const SCHEMA_FALLBACK_TOTAL: &str = "schema_fallback_total";

static FALLBACK_USES: AtomicU64 = AtomicU64::new(0);

/// Primitive kinds understood by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// JSON string.
    String,
    /// JSON number (integers included).
    Number,
    /// JSON boolean.
    Boolean,
    /// Any structured value (objects and arrays).
    Json,
}

impl SchemaType {
    /// The JSON Schema `type` keyword this kind maps back to.
    pub fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Json => "object",
        }
    }
}

/// Where a [`SimpleSchema`] came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSource {
    /// Reduced from the upstream's own schema.
    #[default]
    Upstream,
    /// Taken from the manual fallback table.
    Manual,
}

/// Simplified tool input schema.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleSchema {
    /// Property name to kind.
    pub properties: BTreeMap<String, SchemaType>,
    /// Names that must be present in the arguments.
    #[serde(default)]
    pub required: Vec<String>,
    /// Provenance.
    #[serde(default)]
    pub source: SchemaSource,
}

impl SimpleSchema {
    /// Whether the schema declares no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.required.is_empty()
    }

    /// Translate back into standard JSON Schema.
    ///
    /// `required` is only emitted when non-empty.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, kind)| (name.clone(), json!({ "type": kind.json_type() })))
            .collect();
        let mut schema = json!({ "type": "object", "properties": properties });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }

    /// Required names absent (or `null`) in `args`, in declaration order.
    pub fn missing_required(&self, args: &Map<String, Value>) -> Vec<String> {
        self.required
            .iter()
            .filter(|name| args.get(name.as_str()).is_none_or(Value::is_null))
            .cloned()
            .collect()
    }
}

/// Reduce a JSON Schema into a [`SimpleSchema`].
///
/// Returns `None` when the input is not an object schema with a
/// `properties` map, which is the signal to try the fallback table.
pub fn reduce_json_schema(schema: &Value) -> Option<SimpleSchema> {
    let props = schema.get("properties")?.as_object()?;

    let properties = props
        .iter()
        .map(|(name, prop)| (name.clone(), reduce_property(name, prop)))
        .collect::<BTreeMap<_, _>>();

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Some(SimpleSchema {
        properties,
        required,
        source: SchemaSource::Upstream,
    })
}

fn reduce_property(name: &str, prop: &Value) -> SchemaType {
    match declared_type(prop) {
        Some("string") => SchemaType::String,
        Some("number" | "integer") => SchemaType::Number,
        Some("boolean") => SchemaType::Boolean,
        Some("object" | "array") => SchemaType::Json,
        Some(other) => {
            warn!(property = name, kind = other, "unknown schema type, treating as string");
            SchemaType::String
        }
        None if prop.get("properties").is_some() || prop.get("items").is_some() => SchemaType::Json,
        None if prop.get("enum").is_some() => SchemaType::String,
        None => {
            warn!(property = name, "schema property has no type, treating as string");
            SchemaType::String
        }
    }
}

/// `type` may be a string, an array (`["string", "null"]`) or absent with
/// the real type inside `anyOf`/`oneOf`.
fn declared_type(prop: &Value) -> Option<&str> {
    match prop.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => ["anyOf", "oneOf"].iter().find_map(|key| {
            prop.get(*key)?
                .as_array()?
                .iter()
                .find_map(|variant| declared_type(variant).filter(|t| *t != "null"))
        }),
    }
}

/// Hard-coded schemas for well-known tools whose upstream schema is often
/// missing or unreadable. Keyed by exact (original) tool name.
pub fn manual_fallback(tool_name: &str) -> Option<SimpleSchema> {
    use SchemaType::{Number, String};

    let (properties, required): (&[(&str, SchemaType)], &[&str]) = match tool_name {
        "add" | "subtract" | "multiply" | "divide" => (&[("a", Number), ("b", Number)], &["a", "b"]),
        "echo" => (&[("message", String)], &["message"]),
        "read_file" => (&[("path", String)], &["path"]),
        "write_file" => (&[("path", String), ("content", String)], &["path", "content"]),
        "list_directory" => (&[("path", String)], &["path"]),
        "fetch" => (&[("url", String)], &["url"]),
        "get_current_time" => (&[("timezone", String)], &[]),
        _ => return None,
    };

    Some(SimpleSchema {
        properties: properties
            .iter()
            .map(|(name, kind)| ((*name).to_owned(), *kind))
            .collect(),
        required: required.iter().map(|s| (*s).to_owned()).collect(),
        source: SchemaSource::Manual,
    })
}

/// Reduce an upstream schema, falling back to the manual table and finally
/// to an empty schema. Never rejects the tool.
pub fn reconcile(tool_name: &str, input_schema: Option<&Value>) -> SimpleSchema {
    if let Some(reduced) = input_schema.and_then(reduce_json_schema) {
        return reduced;
    }
    if let Some(manual) = manual_fallback(tool_name) {
        let _ = FALLBACK_USES.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(SCHEMA_FALLBACK_TOTAL, "tool" => tool_name.to_owned()).increment(1);
        debug!(
            tool = tool_name,
            table_version = MANUAL_SCHEMA_TABLE_VERSION,
            "using manual fallback schema"
        );
        return manual;
    }
    debug!(tool = tool_name, "no usable schema, registering with empty schema");
    SimpleSchema::default()
}

/// Number of times the manual fallback table has been used in this process.
pub fn fallback_usage_count() -> u64 {
    FALLBACK_USES.load(Ordering::Relaxed)
}
