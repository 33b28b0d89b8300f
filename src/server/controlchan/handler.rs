//! The common interface of all command handlers.

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::auth::autobanner::AutoBanner;
use crate::auth::Authenticator;
use crate::server::controlchan::{command::Command, ControlChanError, Reply};
use crate::server::ftpserver::options::PassiveHost;
use crate::server::session::SharedSession;
use crate::server::ControlChanMsg;

/// Common interface for all handlers of [`Command`]s.
#[async_trait]
pub(crate) trait CommandHandler: Send + Sync + std::fmt::Debug {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError>;
}

/// Arguments passed to every [`CommandHandler`].
pub(crate) struct CommandContext {
    pub parsed_command: Command,
    pub session: SharedSession,
    pub authenticator: Arc<dyn Authenticator>,
    pub autobanner: Arc<AutoBanner>,
    /// Whether TLS is available at all on this endpoint.
    pub tls_configured: bool,
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    /// Whether the data channel must resume the control channel's session.
    pub require_resumption: bool,
    pub passive_ports: RangeInclusive<u16>,
    pub passive_host: PassiveHost,
    /// Skip the passive host override for loopback/LAN peers.
    pub passive_host_skip_on_lan: bool,
    pub tx_control_chan: mpsc::Sender<ControlChanMsg>,
    pub local_addr: SocketAddr,
    pub logger: slog::Logger,
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("parsed_command", &self.parsed_command)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
