//! rmcp client handler for proxied servers.

use rmcp::model::{ClientCapabilities, ClientInfo, Implementation};
use rmcp::service::{NotificationContext, RoleClient};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::ToolDefinition;

/// Notifications pushed back to the manager by server-initiated
/// messages.
#[derive(Debug, Clone)]
pub enum ServerNotice {
    /// The server's tool list changed; here is the refreshed list.
    ToolsRefreshed {
        /// Which server.
        server_name: String,
        /// New tool list.
        tools: Vec<ToolDefinition>,
    },
}

/// Client-side handler passed to every proxied server connection.
///
/// Cloned per connection; `on_tool_list_changed` re-fetches the list and
/// pushes it to the manager through the notice channel.
#[derive(Clone)]
pub struct ProxyClientHandler {
    server_name: String,
    notice_tx: Option<mpsc::UnboundedSender<ServerNotice>>,
}

impl ProxyClientHandler {
    /// Handler for one server.
    #[must_use]
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            notice_tx: None,
        }
    }

    /// Attach the manager's notice channel.
    #[must_use]
    pub fn with_notice_tx(mut self, tx: mpsc::UnboundedSender<ServerNotice>) -> Self {
        self.notice_tx = Some(tx);
        self
    }
}

impl rmcp::ClientHandler for ProxyClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "gobby".to_string(),
                title: Some("Gobby Daemon".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }

    async fn on_tool_list_changed(&self, context: NotificationContext<RoleClient>) {
        let server = &self.server_name;
        info!(server = %server, "received tools/list_changed notification");

        let tools = match context.peer.list_all_tools().await {
            Ok(rmcp_tools) => rmcp_tools
                .iter()
                .map(|t| ToolDefinition::from_rmcp(t, server))
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(
                    server = %server,
                    error = %e,
                    "failed to re-fetch tools after list_changed"
                );
                return;
            }
        };

        if let Some(tx) = &self.notice_tx {
            let _ = tx.send(ServerNotice::ToolsRefreshed {
                server_name: server.clone(),
                tools,
            });
        }
    }
}

impl std::fmt::Debug for ProxyClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyClientHandler")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
