//! The accept loop.

use std::sync::Arc;

use tokio::net::TcpListener;

use super::error::ServerError;
use super::Server;
use crate::auth::autobanner::AutoBanner;
use crate::net::host_address::HostIp;
use crate::server::controlchan::control_loop::{self, ControlParams};

/// Binds and serves. Every accepted connection gets its own control loop
/// task; banned peers are closed before any greeting is sent.
pub(crate) async fn run(
    server: Server,
    bind_address: &str,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    autobanner: Arc<AutoBanner>,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(bind_address).await.map_err(ServerError::Bind)?;
    let logger = server.logger.clone();
    slog::info!(logger, "listening"; "address" => bind_address, "tls" => ?server.tls_mode);

    let mut shutdown_listener = match &server.shutdown {
        Some(notifier) => Some(notifier.subscribe().await),
        None => None,
    };

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = listen_for_shutdown(&mut shutdown_listener) => {
                slog::info!(logger, "shutdown requested; no longer accepting connections");
                return Ok(());
            }
        };

        let (socket, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                slog::warn!(logger, "accept failed"; "error" => %e);
                continue;
            }
        };

        let peer_ip: HostIp = peer.ip().into();
        if autobanner.is_banned(&peer_ip) {
            // Closed before the greeting: a banned source gets nothing.
            slog::debug!(logger, "refusing banned peer"; "peer" => %peer);
            drop(socket);
            continue;
        }

        let params = ControlParams {
            authenticator: server.authenticator.clone(),
            autobanner: autobanner.clone(),
            greeting: server.greeting,
            passive_ports: server.passive_ports.clone(),
            passive_host: server.passive_host.clone(),
            passive_host_skip_on_lan: server.passive_host_skip_on_lan,
            tls_mode: server.tls_mode,
            tls_config: tls_config.clone(),
            require_data_resumption: server.require_data_resumption,
            idle_session_timeout: server.idle_session_timeout,
            login_timeout: server.login_timeout,
            per_session_limit: server.per_session_limit,
            shutdown: server.shutdown.clone(),
            logger: logger.clone(),
        };

        tokio::spawn(control_loop::spawn_control_channel_loop(params, socket, peer));
    }
}

/// Resolves when shutdown is signalled; pends forever without a notifier.
pub(crate) async fn listen_for_shutdown(listener: &mut Option<crate::server::shutdown::Listener>) {
    match listener {
        Some(listener) => listener.listen().await,
        None => std::future::pending().await,
    }
}
