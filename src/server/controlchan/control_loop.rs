//! The per-connection control channel event loop.

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use slog::Logger;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

use crate::auth::autobanner::AutoBanner;
use crate::auth::Authenticator;
use crate::net::rate_limit::Limit;
use crate::server::controlchan::command::Command;
use crate::server::controlchan::commands;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, ControlChanErrorKind, Event, FtpCodec, Reply, ReplyCode};
use crate::server::ftpserver::options::{PassiveHost, TlsMode};
use crate::server::session::{Session, SharedSession};
use crate::server::ControlChanMsg;
use crate::tvfs;

/// Five permanent failures before login and the connection goes away.
const MAX_PRE_LOGIN_FAILURES: u32 = 5;

/// Everything a control loop needs, captured at accept time.
pub(crate) struct ControlParams {
    pub authenticator: Arc<dyn Authenticator>,
    pub autobanner: Arc<AutoBanner>,
    pub greeting: &'static str,
    pub passive_ports: RangeInclusive<u16>,
    pub passive_host: PassiveHost,
    pub passive_host_skip_on_lan: bool,
    pub tls_mode: TlsMode,
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    pub require_data_resumption: bool,
    pub idle_session_timeout: Duration,
    pub login_timeout: Duration,
    pub per_session_limit: Limit,
    pub shutdown: Option<Arc<crate::server::shutdown::Notifier>>,
    pub logger: Logger,
}

/// A boxed transport the codec runs over; swapped out on `AUTH TLS`.
type ControlStream = Box<dyn ControlIo>;

trait ControlIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ControlIo for T {}

/// A transport with some already-read bytes stitched back in front, so a TLS
/// handshake pipelined right behind `AUTH TLS` is not lost.
struct PrefixedStream {
    prefix: BytesMut,
    inner: ControlStream,
}

impl AsyncRead for PrefixedStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PrefixedStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Runs the control channel for one accepted connection to completion.
pub(crate) async fn spawn_control_channel_loop(params: ControlParams, socket: TcpStream, peer: SocketAddr) {
    let local_addr = match socket.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            slog::warn!(params.logger, "no local address on accepted socket"; "error" => %e);
            return;
        }
    };

    let session = Arc::new(tokio::sync::Mutex::new(Session::new(
        params.logger.clone(),
        peer,
        local_addr,
        params.per_session_limit,
    )));
    let (logger, shared_limits) = {
        let session = session.lock().await;
        (session.logger.clone(), session.shared_limits.clone())
    };

    // The control socket is rate limited like the data socket; the compound
    // picks up the user's limiters at login.
    let socket = crate::net::rate_limit::RateLimitedStream::with_shared(socket, shared_limits);

    // Implicit TLS: the handshake happens before any greeting.
    let stream: ControlStream = if params.tls_mode == TlsMode::ImplicitTls {
        let Some(config) = params.tls_config.clone() else {
            slog::error!(logger, "implicit TLS endpoint without TLS configuration");
            return;
        };
        match tokio_rustls::TlsAcceptor::from(config).accept(socket).await {
            Ok(tls) => {
                session.lock().await.cmd_tls = true;
                Box::new(tls)
            }
            Err(e) => {
                slog::debug!(logger, "implicit TLS handshake failed"; "error" => %e);
                return;
            }
        }
    } else {
        Box::new(socket)
    };

    let mut framed = Framed::new(stream, FtpCodec::new());
    let (control_msg_tx, mut control_msg_rx) = mpsc::channel::<ControlChanMsg>(8);

    if framed
        .send(Reply::new_with_string(ReplyCode::ServiceReady, params.greeting.to_string()))
        .await
        .is_err()
    {
        return;
    }

    let mut invalidation: Option<watch::Receiver<bool>> = None;

    // Holding the listener also gates the notifier's linger() until this
    // session has fully wound down.
    let mut shutdown_listener = match &params.shutdown {
        Some(notifier) => Some(notifier.subscribe().await),
        None => None,
    };

    loop {
        let authenticated = session.lock().await.is_authenticated();
        let timeout = if authenticated { params.idle_session_timeout } else { params.login_timeout };

        // Biased: internal messages outrank fresh input. After AUTH TLS the
        // upgrade must run before the client's handshake bytes are read as
        // commands.
        let event: Option<Result<Event, ControlChanError>> = tokio::select! {
            biased;
            msg = control_msg_rx.recv() => msg.map(|m| Ok(Event::InternalMsg(m))),
            _ = crate::server::ftpserver::listen::listen_for_shutdown(&mut shutdown_listener) => {
                slog::info!(logger, "service shutting down; closing session");
                let _ = framed.send(Reply::new(ReplyCode::ServiceNotAvailable, "Service shutting down. Goodbye")).await;
                return;
            }
            command = framed.next() => command.map(|r| r.map(Event::Command)),
            _ = tokio::time::sleep(timeout) => {
                slog::info!(logger, "session timed out"; "authenticated" => authenticated);
                let _ = framed.send(Reply::new(ReplyCode::ServiceNotAvailable, "Timeout. Closing control connection")).await;
                return;
            }
            changed = watch_invalidation(&mut invalidation) => {
                if changed {
                    slog::info!(logger, "user invalidated; closing session");
                    let _ = framed.send(Reply::new(ReplyCode::ServiceNotAvailable, "User configuration changed. Goodbye")).await;
                    return;
                }
                // Watch ended without an invalidation; stop polling it.
                invalidation = None;
                continue;
            }
        };

        match event {
            None => {
                let routine = session.lock().await.disconnect_is_routine();
                if routine {
                    slog::debug!(logger, "client disconnected");
                } else {
                    slog::info!(logger, "client disconnected unexpectedly");
                }
                return;
            }
            Some(Err(error)) => {
                let (reply, fatal) = reply_for_error(&error);
                let _ = framed.send(reply).await;
                if fatal {
                    return;
                }
                if count_failure_and_check_limit(&session).await {
                    slog::info!(logger, "too many failures before login; closing");
                    return;
                }
            }
            Some(Ok(Event::InternalMsg(ControlChanMsg::SecureControlChannel))) => {
                // The 234 reply is already flushed; upgrade now.
                let Some(config) = params.tls_config.clone() else {
                    slog::error!(logger, "AUTH accepted without TLS configuration");
                    return;
                };
                let parts = framed.into_parts();
                let plain = PrefixedStream {
                    prefix: parts.read_buf,
                    inner: parts.io,
                };
                match tokio_rustls::TlsAcceptor::from(config).accept(plain).await {
                    Ok(tls) => {
                        session.lock().await.cmd_tls = true;
                        slog::info!(logger, "control channel secured");
                        framed = Framed::new(Box::new(tls) as ControlStream, FtpCodec::new());
                    }
                    Err(e) => {
                        slog::info!(logger, "TLS handshake failed"; "error" => %e);
                        return;
                    }
                }
            }
            Some(Ok(Event::InternalMsg(ControlChanMsg::Quit))) => {
                return;
            }
            Some(Ok(Event::InternalMsg(msg))) => {
                let reply = reply_for_internal_msg(msg);
                if framed.send(reply).await.is_err() {
                    return;
                }
            }
            Some(Ok(Event::Command(command))) => {
                let reply = dispatch_command(&params, &session, &control_msg_tx, local_addr, command).await;

                let code = reply.code();
                if framed.send(reply).await.is_err() {
                    return;
                }

                // Track the shared user's invalidation signal once logged in.
                if invalidation.is_none() {
                    if let Some(user) = &session.lock().await.user {
                        invalidation = Some(user.subscribe());
                    }
                }

                if let Some(code) = code {
                    let authenticated = session.lock().await.is_authenticated();
                    if code.is_permanent_failure() && !authenticated {
                        if count_failure_and_check_limit(&session).await {
                            slog::info!(logger, "too many failures before login; closing");
                            return;
                        }
                    } else if !code.is_permanent_failure() {
                        session.lock().await.pre_login_failures = 0;
                    }
                }
            }
        }
    }
}

/// Resolves to `true` when the shared user got invalidated; pends forever
/// while there is nothing to watch.
async fn watch_invalidation(invalidation: &mut Option<watch::Receiver<bool>>) -> bool {
    match invalidation {
        Some(rx) => rx.changed().await.is_ok() && *rx.borrow(),
        None => std::future::pending().await,
    }
}

async fn count_failure_and_check_limit(session: &SharedSession) -> bool {
    let mut session = session.lock().await;
    session.pre_login_failures += 1;
    session.pre_login_failures >= MAX_PRE_LOGIN_FAILURES
}

fn reply_for_error(error: &ControlChanError) -> (Reply, bool) {
    match error.kind() {
        ControlChanErrorKind::UnknownCommand { .. } => (Reply::new(ReplyCode::CommandSyntaxError, "Command not implemented"), false),
        ControlChanErrorKind::Utf8Error => (Reply::new(ReplyCode::CommandSyntaxError, "Invalid UTF-8 in command"), false),
        ControlChanErrorKind::InvalidCommand => (Reply::new(ReplyCode::ParameterSyntaxError, "Invalid parameter"), false),
        ControlChanErrorKind::CommandLineTooLong => (
            Reply::new(ReplyCode::ServiceNotAvailable, "Command line too long. Closing connection"),
            true,
        ),
        ControlChanErrorKind::ControlChannelTimeout => (
            Reply::new(ReplyCode::ServiceNotAvailable, "Timeout. Closing control connection"),
            true,
        ),
        ControlChanErrorKind::IoError => (Reply::none(), true),
        _ => (Reply::new(ReplyCode::LocalError, "Internal server error"), false),
    }
}

fn reply_for_internal_msg(msg: ControlChanMsg) -> Reply {
    use ControlChanMsg::*;

    match msg {
        SentData { bytes } => Reply::new_with_string(ReplyCode::ClosingDataConnection, format!("Sent {} bytes", bytes)),
        WrittenData { bytes } => Reply::new_with_string(ReplyCode::ClosingDataConnection, format!("Stored {} bytes", bytes)),
        DirectorySuccessfullyListed => Reply::new(ReplyCode::ClosingDataConnection, "Directory listing sent"),
        StorageError(error) => reply_for_storage_error(&error),
        DataPeerMismatch => Reply::new(ReplyCode::CantOpenDataConnection, "Data connection peer mismatch"),
        DataTlsFailed => Reply::new(ReplyCode::CantOpenDataConnection, "Failed to secure the data connection"),
        DataConnectionTimedOut => Reply::new(ReplyCode::CantOpenDataConnection, "No data connection established"),
        ConnectionReset => Reply::new(ReplyCode::ConnectionClosed, "Data connection unexpectedly closed"),
        TransferAborted => Reply::new(ReplyCode::ConnectionClosed, "Transfer aborted"),
        SecureControlChannel | Quit => Reply::none(),
    }
}

pub(crate) fn reply_for_storage_error(error: &tvfs::Error) -> Reply {
    match error.kind() {
        tvfs::ErrorKind::NoPerm => Reply::new(ReplyCode::FileError, "Permission denied"),
        tvfs::ErrorKind::NoFile => Reply::new(ReplyCode::FileError, "File not found"),
        tvfs::ErrorKind::NoDir => Reply::new(ReplyCode::FileError, "Not a directory"),
        tvfs::ErrorKind::Invalid => Reply::new(ReplyCode::BadFileName, "Invalid path"),
        tvfs::ErrorKind::NoSpace => Reply::new(ReplyCode::OutOfSpace, "Insufficient storage space"),
        tvfs::ErrorKind::Other => Reply::new(ReplyCode::FileError, "Requested action not taken"),
    }
}

async fn dispatch_command(
    params: &ControlParams,
    session: &SharedSession,
    control_msg_tx: &mpsc::Sender<ControlChanMsg>,
    local_addr: SocketAddr,
    command: Command,
) -> Reply {
    use Command::*;

    // Commands exempt from the login requirement.
    let needs_auth = !matches!(
        command,
        User { .. } | Pass { .. } | Auth { .. } | Feat | Help | Quit | Noop | Syst | Stat { .. } | Pbsz { .. } | Prot { .. } | Opts { .. }
    );

    {
        let session = session.lock().await;

        if needs_auth && !session.is_authenticated() {
            return Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first");
        }

        // A policy of required TLS refuses USER on a plaintext channel.
        if params.tls_mode == TlsMode::RequireTls && !session.cmd_tls && matches!(command, User { .. } | Pass { .. }) {
            return Reply::new(ReplyCode::RefusedSecurityLevel, "Policy requires TLS before login");
        }
    }

    // Pick up in-place mount table updates before touching the TVFS.
    {
        let mut session = session.lock().await;
        if let (Some(user), Some(engine)) = (session.user.clone(), session.engine.as_mut()) {
            engine.set_mount_tree(user.mount_tree());
        }
    }

    let context = CommandContext {
        parsed_command: command.clone(),
        session: session.clone(),
        authenticator: params.authenticator.clone(),
        autobanner: params.autobanner.clone(),
        tls_configured: params.tls_config.is_some(),
        tls_config: params.tls_config.clone(),
        require_resumption: params.require_data_resumption,
        passive_ports: params.passive_ports.clone(),
        passive_host: params.passive_host.clone(),
        passive_host_skip_on_lan: params.passive_host_skip_on_lan,
        tx_control_chan: control_msg_tx.clone(),
        local_addr,
        logger: session.lock().await.logger.clone(),
    };

    let handler: Box<dyn CommandHandler> = match command {
        User { .. } => Box::new(commands::User),
        Pass { .. } => Box::new(commands::Pass),
        Quit => Box::new(commands::Quit),
        Syst => Box::new(commands::Syst),
        Stat { .. } => Box::new(commands::Stat),
        Type { .. } => Box::new(commands::Type),
        Stru { .. } => Box::new(commands::Stru),
        Mode { .. } => Box::new(commands::Mode),
        Help => Box::new(commands::Help),
        Noop => Box::new(commands::Noop),
        Acct => Box::new(commands::Acct),
        Pwd => Box::new(commands::Pwd),
        Cwd { .. } => Box::new(commands::Cwd),
        Cdup => Box::new(commands::Cdup),
        Mkd { .. } => Box::new(commands::Mkd),
        Rmd { .. } => Box::new(commands::Rmd),
        Dele { .. } => Box::new(commands::Dele),
        Rnfr { .. } => Box::new(commands::Rnfr),
        Rnto { .. } => Box::new(commands::Rnto),
        List { .. } => Box::new(commands::List),
        Nlst { .. } => Box::new(commands::Nlst),
        Mlst { .. } => Box::new(commands::Mlst),
        Mlsd { .. } => Box::new(commands::Mlsd),
        Size { .. } => Box::new(commands::Size),
        Mdtm { .. } => Box::new(commands::Mdtm),
        Mfmt { .. } => Box::new(commands::Mfmt),
        Rest { .. } => Box::new(commands::Rest),
        Retr { .. } => Box::new(commands::Retr),
        Stor { .. } => Box::new(commands::Stor),
        Appe { .. } => Box::new(commands::Appe),
        Stou => Box::new(commands::Stou),
        Allo => Box::new(commands::Allo),
        Abor => Box::new(commands::Abor),
        Port { .. } => Box::new(commands::Port),
        Eprt { .. } => Box::new(commands::Eprt),
        Pasv => Box::new(commands::Pasv),
        Epsv { .. } => Box::new(commands::Epsv),
        Feat => Box::new(commands::Feat),
        Opts { .. } => Box::new(commands::Opts),
        Auth { .. } => Box::new(commands::Auth),
        Pbsz { .. } => Box::new(commands::Pbsz),
        Prot { .. } => Box::new(commands::Prot),
        Ccc => Box::new(commands::Ccc),
    };

    match handler.handle(context).await {
        Ok(reply) => reply,
        Err(error) => {
            let (reply, _) = reply_for_error(&error);
            reply
        }
    }
}
