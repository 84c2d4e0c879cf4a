//! Minimal line-delimited JSON-RPC server used by the stdio integration tests.
//!
//! Tools: `add(a, b)`, `echo(text)`, `crash` (exits the process).
//! Unlisted tool `garble` floods stderr and writes a non-UTF-8 stdout line
//! before its reply.
//! Resource: `mock://readme`. Prompt: `greet(who)`.
//! With `MOCK_UPSTREAM_NO_RESOURCES` set, resource and prompt methods answer
//! "method not found".

use std::io::Write;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    let catalogs = std::env::var_os("MOCK_UPSTREAM_NO_RESOURCES").is_none();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock_upstream: unparseable line");
            continue;
        };
        let Some(id) = message.get("id").cloned() else {
            // Notification.
            continue;
        };
        let method = message["method"].as_str().unwrap_or_default();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        if method == "tools/call" && params["name"] == "crash" {
            std::process::exit(3);
        }
        if method == "tools/call" && params["name"] == "garble" {
            let noise = [0xff_u8, 0xfe, b'\n'].repeat(64 * 1024);
            std::io::stderr().write_all(&noise)?;
            stdout.write_all(b"\xff\xfe not json\n").await?;
        }

        let reply = match handle(method, &params, catalogs) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
            }
        };
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn handle(method: &str, params: &Value, catalogs: bool) -> Result<Value, (i64, String)> {
    let not_found = || Err((-32601, format!("Method not found: {method}")));
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock-upstream", "version": "0.0.0"}
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({"tools": [
            {
                "name": "add",
                "description": "Add two numbers",
                "inputSchema": {
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }
            },
            {
                "name": "echo",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }
            },
            {"name": "crash", "inputSchema": {"type": "object", "properties": {}}}
        ]})),
        "tools/call" => {
            let args = &params["arguments"];
            match params["name"].as_str() {
                Some("add") => {
                    let sum = args["a"].as_f64().unwrap_or_default() + args["b"].as_f64().unwrap_or_default();
                    Ok(json!({"content": [{"type": "text", "text": sum.to_string()}]}))
                }
                Some("echo") => Ok(json!({"content": [{"type": "text", "text": args["text"]}]})),
                other => Ok(json!({
                    "content": [{"type": "text", "text": format!("unknown tool {other:?}")}],
                    "isError": true
                })),
            }
        }
        "resources/list" if catalogs => Ok(json!({"resources": [
            {"uri": "mock://readme", "name": "readme", "mimeType": "text/plain"}
        ]})),
        "resources/read" if catalogs => Ok(json!({"contents": [
            {"uri": params["uri"], "mimeType": "text/plain", "text": "mock readme"}
        ]})),
        "prompts/list" if catalogs => Ok(json!({"prompts": [
            {"name": "greet", "arguments": [{"name": "who", "required": true}]}
        ]})),
        "prompts/get" if catalogs => {
            let who = params["arguments"]["who"].as_str().unwrap_or("world");
            Ok(json!({"messages": [
                {"role": "user", "content": {"type": "text", "text": format!("Hello, {who}!")}}
            ]}))
        }
        _ => not_found(),
    }
}
