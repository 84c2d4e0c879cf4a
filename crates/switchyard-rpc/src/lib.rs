//! # switchyard-rpc
//!
//! JSON-RPC 2.0 method layer of the gateway:
//!
//! - **Registry**: `MethodHandler` trait, name → handler table, timeout and metrics
//! - **Handlers**: lifecycle, tools, resources, prompts, upstream administration
//! - **Built-ins**: gateway-local resources and prompts merged into every listing
//! - **Dispatcher**: single and batch payloads for every inbound transport

#![deny(unsafe_code)]

pub mod builtins;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod handlers;
pub mod registry;

pub use context::RpcContext;
pub use dispatcher::Dispatcher;
pub use errors::RpcError;
pub use registry::{MethodHandler, MethodRegistry};
