//! Shared machinery of `PASV` and `EPSV`: the port lease, the listener, and
//! the data-channel task.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;

use crate::server::controlchan::handler::CommandContext;
use crate::server::controlchan::{Reply, ReplyCode};
use crate::server::datachan::{self, DataChanParams};
use crate::server::ftpserver::options::{peer_is_local, PassiveHost};

/// How many random leases from the configured range are attempted before
/// giving up.
const BIND_RETRIES: usize = 15;

/// Binds a listener on a randomized port from the configured range.
async fn bind_in_range(ip: IpAddr, range: &std::ops::RangeInclusive<u16>) -> Option<TcpListener> {
    let span = (*range.end() - *range.start()) as u32 + 1;

    for _ in 0..BIND_RETRIES {
        let mut raw = [0u8; 2];
        if getrandom::fill(&mut raw).is_err() {
            break;
        }
        let offset = u16::from_le_bytes(raw) as u32 % span;
        let port = *range.start() + offset as u16;

        if let Ok(listener) = TcpListener::bind(SocketAddr::new(ip, port)).await {
            return Some(listener);
        }
    }
    None
}

/// The advertised IPv4 address for a `227` reply.
async fn advertised_ip(args: &CommandContext, peer: IpAddr, local_ip: IpAddr) -> Option<Ipv4Addr> {
    let from_connection = match local_ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    };

    // A NAT override makes no sense when the peer is on our own network.
    let overridden = args.passive_host_skip_on_lan && peer_is_local(peer);

    match (&args.passive_host, overridden) {
        (PassiveHost::FromConnection, _) | (_, true) => from_connection,
        (PassiveHost::Ip(ip), false) => Some(*ip),
        (PassiveHost::Dns(name), false) => {
            let resolved = tokio::net::lookup_host((name.as_str(), 0)).await.ok()?;
            resolved
                .filter_map(|addr| match addr.ip() {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                })
                .next()
                .or(from_connection)
        }
    }
}

/// Sets up a passive data connection and answers `227` or `229`.
pub(super) async fn setup_passive(args: CommandContext, extended: bool) -> Reply {
    // Replace any lingering, never-used data connection.
    let (engine, peer, limits) = {
        let mut session = args.session.lock().await;
        session.close_data_channel();

        let Some(engine) = session.engine.clone() else {
            return Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first");
        };
        (engine, session.peer, session.shared_limits.clone())
    };

    let Some(listener) = bind_in_range(args.local_addr.ip(), &args.passive_ports).await else {
        return Reply::new(ReplyCode::CantOpenDataConnection, "No data port available");
    };
    let Ok(listen_addr) = listener.local_addr() else {
        return Reply::new(ReplyCode::CantOpenDataConnection, "No data port available");
    };
    let port = listen_addr.port();

    let reply = if extended {
        Reply::new_with_string(
            ReplyCode::EnteringExtendedPassiveMode,
            format!("Entering Extended Passive Mode (|||{}|)", port),
        )
    } else {
        let Some(ip) = advertised_ip(&args, peer.ip(), args.local_addr.ip()).await else {
            return Reply::new(
                ReplyCode::NetworkProtocolUnsupported,
                "PASV has no IPv6 form. Use EPSV",
            );
        };
        let o = ip.octets();
        Reply::new_with_string(
            ReplyCode::EnteringPassiveMode,
            format!(
                "Entering Passive Mode ({},{},{},{},{},{})",
                o[0],
                o[1],
                o[2],
                o[3],
                port >> 8,
                port & 0xff
            ),
        )
    };

    let (require_resumption, logger) = {
        let session = args.session.lock().await;
        (args.require_resumption && session.cmd_tls, session.logger.clone())
    };

    let params = DataChanParams {
        session: args.session.clone(),
        engine,
        logger,
        tx: args.tx_control_chan.clone(),
        tls_config: args.tls_config.clone(),
        require_resumption,
        control_peer_ip: peer.ip(),
        limits,
    };

    let (cmd_tx, abort_tx) = datachan::spawn_passive(listener, params);

    let mut session = args.session.lock().await;
    session.data_cmd_tx = Some(cmd_tx);
    session.data_abort_tx = Some(abort_tx);

    reply
}
