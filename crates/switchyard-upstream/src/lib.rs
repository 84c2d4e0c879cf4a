//! # switchyard-upstream
//!
//! Connections to upstream MCP servers and the merged catalog built from them.
//!
//! - **Adapters**: one [`TransportAdapter`] per wire transport (stdio
//!   subprocess, streamable HTTP, SSE and WebSocket endpoints over HTTP POST)
//! - **Registry**: [`UpstreamRegistry`] owns live instances, namespaces their
//!   tools, resolves name conflicts and aggregates resources and prompts
//! - **Supervision**: [`ReconnectSupervisor`] retries failed upstreams with
//!   bounded exponential backoff; health probes hand unhealthy upstreams to it
//! - **Status**: per-upstream counters and `metrics` gauges for the admin API

#![deny(unsafe_code)]

pub mod adapter;
pub mod errors;
pub mod factory;
pub mod health;
pub mod mapping;
pub mod registry;
pub mod status;
pub mod supervisor;
pub mod tool;

pub use adapter::TransportAdapter;
pub use adapter::http::HttpAdapter;
pub use adapter::stdio::StdioAdapter;
pub use errors::{Result, UpstreamError};
pub use factory::{AdapterFactory, DefaultAdapterFactory};
pub use mapping::NameMapper;
pub use registry::{UpstreamInstance, UpstreamPrompt, UpstreamRegistry, UpstreamResource};
pub use status::{UpstreamStatus, UpstreamStatusStore};
pub use supervisor::{ReconnectState, ReconnectStats, ReconnectSupervisor, Reconnector, backoff_delay};
