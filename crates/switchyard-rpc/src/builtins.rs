//! Gateway-local resources and prompts.
//!
//! These are always listed, ahead of upstream items, so listings stay
//! non-empty when every upstream is down. Lookups check them before any
//! upstream resolution.

use serde_json::{Map, Value, json};

use switchyard_core::catalog::{PromptArgument, PromptItem, ResourceItem};

use crate::context::RpcContext;
use crate::errors::RpcError;

/// Server identity and uptime as JSON.
pub const SERVER_INFO_URI: &str = "info://server";
/// Markdown usage notes.
pub const HELP_URI: &str = "help://usage";

const HELP_TEXT: &str = "# Switchyard gateway

## Resources

- `info://server` - server identity, uptime and capabilities
- `help://usage` - this page
- upstream resources, listed with their `upstream` and `namespace`

## Prompts

- `review-code` - review code for quality and likely bugs
- `explain-code` - explain what code does and how
- `optimize-code` - suggest optimizations
- upstream prompts, published as `{namespace}_{name}`

## Tools

Upstream tools are published as `{namespace}_{name}`; see `tools/list`.
";

/// `(name, title, description, instruction)` of each code prompt.
const CODE_PROMPTS: &[(&str, &str, &str, &str)] = &[
    (
        "review-code",
        "Code review",
        "Review code for quality and potential problems",
        "Please review the following code",
    ),
    (
        "explain-code",
        "Explain code",
        "Explain what the code does and how it works",
        "Please explain the following code",
    ),
    (
        "optimize-code",
        "Optimize code",
        "Suggest optimizations for the code",
        "Please optimize the following code",
    ),
];

/// Built-in resources.
pub fn builtin_resources() -> Vec<ResourceItem> {
    vec![
        ResourceItem {
            uri: SERVER_INFO_URI.into(),
            name: Some("server-info".into()),
            title: Some("Server information".into()),
            description: Some("Gateway identity, uptime and capabilities".into()),
            mime_type: Some("application/json".into()),
        },
        ResourceItem {
            uri: HELP_URI.into(),
            name: Some("help".into()),
            title: Some("Usage".into()),
            description: Some("How to use the gateway".into()),
            mime_type: Some("text/markdown".into()),
        },
    ]
}

/// Read a built-in resource; `None` if `uri` is not one.
pub fn read_builtin_resource(uri: &str, ctx: &RpcContext) -> Option<Value> {
    let (mime, text) = match uri {
        SERVER_INFO_URI => {
            let (name, version) = ctx.server_identity();
            let tools = ctx.registry.get_aggregated_tools().len();
            let info = json!({
                "name": name,
                "version": version,
                "uptime": ctx.uptime_secs(),
                "capabilities": {"tools": tools, "resources": true, "prompts": true, "logging": true},
                "toolsCount": tools,
                "upstreams": {
                    "configured": ctx.config.current().upstreams.len(),
                    "connected": ctx.registry.connected_count(),
                },
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            ("application/json", serde_json::to_string_pretty(&info).unwrap_or_default())
        }
        HELP_URI => ("text/markdown", HELP_TEXT.to_owned()),
        _ => return None,
    };
    Some(json!({"contents": [{"uri": uri, "mimeType": mime, "text": text}]}))
}

/// Built-in prompts.
pub fn builtin_prompts() -> Vec<PromptItem> {
    CODE_PROMPTS
        .iter()
        .map(|(name, title, description, _)| PromptItem {
            name: (*name).into(),
            title: Some((*title).into()),
            description: Some((*description).into()),
            arguments: vec![PromptArgument {
                name: "code".into(),
                description: Some("Source code".into()),
                required: true,
            }],
        })
        .collect()
}

/// Render a built-in prompt; `None` if `name` is not one.
pub fn get_builtin_prompt(name: &str, arguments: &Map<String, Value>) -> Option<Result<Value, RpcError>> {
    let (_, _, description, instruction) = CODE_PROMPTS.iter().find(|(n, ..)| *n == name)?;
    let Some(code) = arguments.get("code").and_then(Value::as_str) else {
        return Some(Err(RpcError::invalid_params(format!(
            "prompt `{name}` requires a string argument `code`"
        ))));
    };
    Some(Ok(json!({
        "description": description,
        "messages": [{
            "role": "user",
            "content": {"type": "text", "text": format!("{instruction}:\n\n{code}")}
        }]
    })))
}
