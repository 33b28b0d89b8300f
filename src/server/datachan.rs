//! The data channel: one task per transfer request.
//!
//! A passive setup spawns [`spawn_passive`]: the task accepts exactly one
//! connection, verifies the peer is the control-channel peer, secures the
//! socket when `PROT P` is armed (requiring resumption of the control
//! channel's TLS session), and then executes the one transfer command the
//! control loop sends it. Progress and the final outcome travel back as
//! [`ControlChanMsg`]s.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use slog::Logger;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::net::rate_limit::{RateLimitedStream, SharedRateLimit};
use crate::server::chancomms::{ControlChanMsg, DataChanCmd};
use crate::server::session::SharedSession;
use crate::tvfs::{Engine, OpenMode, RestartPoint, TraversalMode};

const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Everything the data task needs, captured at setup time.
pub struct DataChanParams {
    /// The owning session.
    pub session: SharedSession,
    /// The user's TVFS engine.
    pub engine: Engine,
    /// Data-channel logger.
    pub logger: Logger,
    /// Result channel back to the control loop.
    pub tx: mpsc::Sender<ControlChanMsg>,
    /// TLS configuration, for when the session armed `PROT P`.
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    /// Whether a secured data connection must resume the control channel's
    /// TLS session.
    pub require_resumption: bool,
    /// The control-channel peer; the data peer must match.
    pub control_peer_ip: IpAddr,
    /// Traffic shaping for the data socket; shared with the control socket.
    pub limits: SharedRateLimit,
}

/// Spawns the passive data task on `listener`. Returns the command and abort
/// channels the control side holds.
pub fn spawn_passive(listener: TcpListener, params: DataChanParams) -> (mpsc::Sender<DataChanCmd>, mpsc::Sender<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    let (abort_tx, abort_rx) = mpsc::channel(1);

    tokio::spawn(run_passive(listener, params, cmd_rx, abort_rx));

    (cmd_tx, abort_tx)
}

async fn run_passive(
    listener: TcpListener,
    params: DataChanParams,
    mut cmd_rx: mpsc::Receiver<DataChanCmd>,
    mut abort_rx: mpsc::Receiver<()>,
) {
    let DataChanParams {
        session,
        engine,
        logger,
        tx,
        tls_config,
        require_resumption,
        control_peer_ip,
        limits,
    } = params;

    // Step one: the client connects to us.
    let socket: TcpStream = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((socket, peer)) => {
                if peer.ip() != control_peer_ip {
                    slog::warn!(logger, "data connection from foreign peer refused";
                        "expected" => %control_peer_ip, "got" => %peer.ip());
                    let _ = tx.send(ControlChanMsg::DataPeerMismatch).await;
                    return;
                }
                socket
            }
            Err(e) => {
                slog::warn!(logger, "accepting data connection failed"; "error" => %e);
                let _ = tx.send(ControlChanMsg::ConnectionReset).await;
                return;
            }
        },
        _ = tokio::time::sleep(ACCEPT_TIMEOUT) => {
            let _ = tx.send(ControlChanMsg::DataConnectionTimedOut).await;
            return;
        }
        _ = abort_rx.recv() => {
            let _ = tx.send(ControlChanMsg::TransferAborted).await;
            return;
        }
    };

    // Step two: secure it when the session armed PROT P.
    let secure = session.lock().await.data_tls;
    let stream: Box<dyn AsyncStream> = if secure {
        let Some(config) = tls_config else {
            slog::error!(logger, "PROT P armed but no TLS configuration present");
            let _ = tx.send(ControlChanMsg::DataTlsFailed).await;
            return;
        };
        let acceptor = tokio_rustls::TlsAcceptor::from(config);
        match acceptor.accept(socket).await {
            Ok(tls_stream) => {
                let (_, conn) = tls_stream.get_ref();
                let resumed = conn.handshake_kind() == Some(rustls::HandshakeKind::Resumed);
                if require_resumption && !resumed {
                    slog::warn!(logger, "data connection did not resume the control TLS session");
                    let _ = tx.send(ControlChanMsg::DataTlsFailed).await;
                    return;
                }
                Box::new(tls_stream)
            }
            Err(e) => {
                slog::warn!(logger, "data channel TLS handshake failed"; "error" => %e);
                let _ = tx.send(ControlChanMsg::DataTlsFailed).await;
                return;
            }
        }
    } else {
        Box::new(socket)
    };

    let mut stream = RateLimitedStream::with_shared(stream, limits);

    // Step three: execute the one command this connection exists for.
    let cmd = tokio::select! {
        cmd = cmd_rx.recv() => match cmd {
            Some(cmd) => cmd,
            None => return, // control side went away
        },
        _ = abort_rx.recv() => {
            let _ = tx.send(ControlChanMsg::TransferAborted).await;
            return;
        }
    };

    session.lock().await.data_busy = true;
    let msg = tokio::select! {
        msg = execute(&engine, &session, &logger, cmd, &mut stream) => msg,
        _ = abort_rx.recv() => ControlChanMsg::TransferAborted,
    };
    let mut locked = session.lock().await;
    locked.data_busy = false;
    locked.data_cmd_tx = None;
    locked.data_abort_tx = None;
    drop(locked);

    let _ = tx.send(msg).await;
}

async fn execute(
    engine: &Engine,
    session: &SharedSession,
    logger: &Logger,
    cmd: DataChanCmd,
    stream: &mut RateLimitedStream<Box<dyn AsyncStream>>,
) -> ControlChanMsg {
    match cmd {
        DataChanCmd::Retr { path, start_pos } => {
            let rest = if start_pos > 0 { RestartPoint::Offset(start_pos) } else { RestartPoint::Start };
            let mut file = match engine.open_file(&path, OpenMode::Reading, rest).await {
                Ok(file) => file,
                Err(e) => return ControlChanMsg::StorageError(e),
            };
            match tokio::io::copy(&mut file, stream).await {
                Ok(bytes) => {
                    if stream.shutdown().await.is_err() {
                        return ControlChanMsg::ConnectionReset;
                    }
                    slog::info!(logger, "file sent"; "path" => path.as_str(), "bytes" => bytes);
                    ControlChanMsg::SentData { bytes }
                }
                Err(e) => {
                    slog::warn!(logger, "send failed"; "path" => path.as_str(), "error" => %e);
                    ControlChanMsg::ConnectionReset
                }
            }
        }
        DataChanCmd::Stor { path, start_pos } => {
            let rest = if start_pos > 0 { RestartPoint::Offset(start_pos) } else { RestartPoint::Start };
            store(engine, logger, &path, rest, stream).await
        }
        DataChanCmd::Appe { path } => store(engine, logger, &path, RestartPoint::Append, stream).await,
        DataChanCmd::List { path } => {
            let target = path.unwrap_or_else(|| engine.current_directory());
            let entries = match engine.get_entries(&target, TraversalMode::Autodetect).await {
                Ok(entries) => entries,
                Err(e) => return ControlChanMsg::StorageError(e),
            };
            let mut out = String::new();
            for entry in entries {
                out.push_str(&crate::server::listing::unix_long_line(&entry));
                out.push_str("\r\n");
            }
            send_listing(stream, out).await
        }
        DataChanCmd::Nlst { path } => {
            let target = path.unwrap_or_else(|| engine.current_directory());
            let entries = match engine.get_entries(&target, TraversalMode::Autodetect).await {
                Ok(entries) => entries,
                Err(e) => return ControlChanMsg::StorageError(e),
            };
            let mut out = String::new();
            for entry in entries {
                out.push_str(&crate::server::listing::name_only_line(&entry));
                out.push_str("\r\n");
            }
            send_listing(stream, out).await
        }
        DataChanCmd::Mlsd { path } => {
            let target = path.unwrap_or_else(|| engine.current_directory());
            let entries = match engine.get_entries(&target, TraversalMode::OnlyChildren).await {
                Ok(entries) => entries,
                Err(e) => return ControlChanMsg::StorageError(e),
            };
            let facts = session.lock().await.mlst_facts.clone();
            let mut out = String::new();
            for entry in entries {
                out.push_str(&crate::server::listing::mlsx_line(&entry, &facts, false));
                out.push_str("\r\n");
            }
            send_listing(stream, out).await
        }
    }
}

async fn store(
    engine: &Engine,
    logger: &Logger,
    path: &str,
    rest: RestartPoint,
    stream: &mut RateLimitedStream<Box<dyn AsyncStream>>,
) -> ControlChanMsg {
    let mut file = match engine.open_file(path, OpenMode::Writing, rest).await {
        Ok(file) => file,
        Err(e) => return ControlChanMsg::StorageError(e),
    };
    match tokio::io::copy(stream, &mut file).await {
        Ok(bytes) => {
            if file.flush().await.is_err() {
                return ControlChanMsg::ConnectionReset;
            }
            slog::info!(logger, "file received"; "path" => path, "bytes" => bytes);
            ControlChanMsg::WrittenData { bytes }
        }
        Err(e) => {
            slog::warn!(logger, "receive failed"; "path" => path, "error" => %e);
            ControlChanMsg::ConnectionReset
        }
    }
}

async fn send_listing(stream: &mut RateLimitedStream<Box<dyn AsyncStream>>, out: String) -> ControlChanMsg {
    if stream.write_all(out.as_bytes()).await.is_err() || stream.shutdown().await.is_err() {
        return ControlChanMsg::ConnectionReset;
    }
    ControlChanMsg::DirectorySuccessfullyListed
}
