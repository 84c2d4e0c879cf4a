//! # switchyard-core
//!
//! Shared vocabulary for the switchyard gateway crates:
//!
//! - **JSON-RPC**: 2.0 request/response envelopes and standard error codes
//! - **Catalog**: tool, resource and prompt value types as listed by upstreams
//! - **Schema**: reduction of JSON Schema into the simplified gateway shape,
//!   plus the manual fallback table
//! - **Lines**: incremental newline splitting for NDJSON and SSE bodies
//! - **Ticker**: cancellable periodic task used by every timer family
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod catalog;
pub mod constants;
pub mod jsonrpc;
pub mod lines;
pub mod logging;
pub mod schema;
pub mod ticker;

pub use catalog::{ToolCallResult, ToolHandler, ToolSpec};
pub use jsonrpc::{JsonRpcErrorBody, JsonRpcRequest, JsonRpcResponse};
pub use schema::{SchemaSource, SchemaType, SimpleSchema};
