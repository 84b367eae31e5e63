//! Transport plumbing: stdio subprocess, streamable HTTP, websocket.
//!
//! All three end in the same place — an rmcp client session served over
//! the transport — so callers only ever see
//! `RunningService<RoleClient, ProxyClientHandler>`.
//!
//! The websocket path bridges frames onto rmcp's async-read/write
//! transport: each text frame is one JSON-RPC message, which maps 1:1
//! onto the line-delimited framing of the async-rw transport.

use futures::{SinkExt, StreamExt};
use rmcp::ServiceExt;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use gobby_storage::models::{McpServerConfig, McpTransport};

use crate::error::{McpError, McpResult};
use crate::handler::ProxyClientHandler;

/// An established client session.
pub type ClientSession = RunningService<RoleClient, ProxyClientHandler>;

/// Connect to a server per its configured transport and perform the MCP
/// handshake.
///
/// # Errors
///
/// Returns an [`McpError`] when the transport cannot be established or
/// the handshake fails.
pub async fn connect(
    config: &McpServerConfig,
    handler: ProxyClientHandler,
) -> McpResult<ClientSession> {
    match config.transport {
        McpTransport::Stdio => connect_stdio(config, handler).await,
        McpTransport::Http => connect_http(config, handler).await,
        McpTransport::Websocket => connect_websocket(config, handler).await,
    }
}

async fn connect_stdio(
    config: &McpServerConfig,
    handler: ProxyClientHandler,
) -> McpResult<ClientSession> {
    let command = config.command.as_deref().ok_or_else(|| McpError::InvalidConfig {
        name: config.name.clone(),
        reason: "stdio transport requires a command".to_string(),
    })?;

    // Resolve through PATH up front for a clearer error than a spawn
    // failure buried in the transport.
    let program = which::which(command).map_err(|_| McpError::InvalidConfig {
        name: config.name.clone(),
        reason: format!("command '{command}' not found in PATH"),
    })?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(&config.args);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    let transport =
        TokioChildProcess::new(cmd).map_err(|e| McpError::Transport(e.to_string()))?;
    let session = handler
        .serve(transport)
        .await
        .map_err(|e| McpError::Transport(format!("MCP handshake failed: {e}")))?;
    debug!(server = %config.name, "stdio MCP connection established");
    Ok(session)
}

async fn connect_http(
    config: &McpServerConfig,
    handler: ProxyClientHandler,
) -> McpResult<ClientSession> {
    let url = config.url.as_deref().ok_or_else(|| McpError::InvalidConfig {
        name: config.name.clone(),
        reason: "http transport requires a url".to_string(),
    })?;

    let transport = StreamableHttpClientTransport::from_uri(url.to_string());
    let session = handler
        .serve(transport)
        .await
        .map_err(|e| McpError::Transport(format!("MCP handshake failed: {e}")))?;
    debug!(server = %config.name, url, "http MCP connection established");
    Ok(session)
}

async fn connect_websocket(
    config: &McpServerConfig,
    handler: ProxyClientHandler,
) -> McpResult<ClientSession> {
    let url = config.url.as_deref().ok_or_else(|| McpError::InvalidConfig {
        name: config.name.clone(),
        reason: "websocket transport requires a url".to_string(),
    })?;

    let (socket, _) = connect_async(url)
        .await
        .map_err(|e| McpError::Transport(format!("websocket connect failed: {e}")))?;
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Bridge: rmcp speaks newline-delimited JSON over AsyncRead/Write;
    // the socket speaks one JSON-RPC message per text frame.
    let (client_io, bridge_io) = tokio::io::duplex(64 * 1024);
    let (bridge_read, mut bridge_write) = tokio::io::split(bridge_io);

    let server_name = config.name.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(bridge_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if ws_sink.send(Message::Text(line.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let recv_server = config.name.clone();
    tokio::spawn(async move {
        while let Some(frame) = ws_stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if bridge_write.write_all(text.as_bytes()).await.is_err() {
                        break;
                    }
                    if bridge_write.write_all(b"\n").await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                // Ping/pong handled by tungstenite; binary frames are
                // not part of the MCP websocket profile.
                Ok(_) => {}
            }
        }
        debug!(server = %recv_server, "websocket receive loop ended");
    });

    let session = handler
        .serve(tokio::io::split(client_io))
        .await
        .map_err(|e| McpError::Transport(format!("MCP handshake failed: {e}")))?;
    debug!(server = %server_name, url, "websocket MCP connection established");
    Ok(session)
}

/// Close a session, bounded by `timeout`. Errors are logged, never
/// returned — shutdown must not fail because one server hung up badly.
pub async fn close_session(name: &str, session: ClientSession, timeout: std::time::Duration) {
    match tokio::time::timeout(timeout, session.cancel()).await {
        Ok(Ok(_)) => debug!(server = name, "MCP session closed"),
        Ok(Err(e)) => warn!(server = name, error = %e, "error closing MCP session"),
        Err(_) => warn!(server = name, "timed out closing MCP session"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stdio_config(command: Option<&str>) -> McpServerConfig {
        McpServerConfig {
            name: "test".into(),
            project_id: None,
            transport: McpTransport::Stdio,
            url: None,
            command: command.map(str::to_string),
            args: Vec::new(),
            env: HashMap::new(),
            headers: HashMap::new(),
            enabled: true,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_stdio_without_command_is_invalid() {
        let err = connect(&stdio_config(None), ProxyClientHandler::new("test"))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_stdio_unknown_binary_is_invalid() {
        let err = connect(
            &stdio_config(Some("definitely-not-an-mcp-server-binary")),
            ProxyClientHandler::new("test"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not found in PATH"));
    }

    #[tokio::test]
    async fn test_websocket_without_url_is_invalid() {
        let mut config = stdio_config(None);
        config.transport = McpTransport::Websocket;
        let err = connect(&config, ProxyClientHandler::new("test"))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_websocket_refused_connection_is_transport_error() {
        let mut config = stdio_config(None);
        config.transport = McpTransport::Websocket;
        config.url = Some("ws://127.0.0.1:1/mcp".into());
        let err = connect(&config, ProxyClientHandler::new("test"))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }
}
