//! # switchyard-server
//!
//! HTTP surface of the gateway:
//!
//! - **Routes**: streamable HTTP, NDJSON and SSE on `/mcp`, WebSocket on `/mcp/ws`, admin API
//! - **Sessions**: streaming sessions with idle sweep, expiry warnings and heartbeats
//! - **Admission**: global and per-source caps on open streams
//! - **Auth**: bearer-token gate on `/mcp*` and `/api/*`
//! - **Stdio**: the same dispatcher over stdin/stdout

#![deny(unsafe_code)]

pub mod admission;
pub mod auth;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod source;
pub mod stdio;

pub use admission::{AdmissionController, Connection, Rejection};
pub use server::{AppState, GatewayServer};
pub use session::{Frame, Session, SessionKind, SessionManager};
pub use shutdown::ShutdownCoordinator;
pub use stdio::serve_stdio;
