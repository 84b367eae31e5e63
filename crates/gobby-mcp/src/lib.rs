//! MCP client manager for the Gobby daemon.
//!
//! Lazily connects to configured MCP servers (stdio subprocess,
//! streamable HTTP, or websocket), with per-server single-flight
//! connection, circuit breakers, a background health monitor that
//! schedules tracked reconnects, and per-call metrics persisted through
//! the store. Built on the official `rmcp` SDK.

pub mod breaker;
pub mod error;
pub mod handler;
pub mod manager;
pub mod transport;
pub mod types;

pub use breaker::{BreakerDecision, CircuitBreaker, CircuitState};
pub use error::{McpError, McpResult};
pub use handler::{ProxyClientHandler, ServerNotice};
pub use manager::{ManagerConfig, McpClientManager};
pub use types::{ConnectionState, HealthState, ServerHealth, ServerStatus, ToolDefinition};
