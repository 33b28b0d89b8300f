//! Per-connection session state.

use std::net::SocketAddr;
use std::sync::Arc;

use slog::Logger;
use tokio::sync::{mpsc, Mutex};

use crate::auth::authenticator::AuthOperation;
use crate::auth::SharedUser;
use crate::net::rate_limit::{CompoundRateLimit, Limit, RateLimiter, SharedRateLimit};
use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::command::ModeParam;
use crate::tvfs::Engine;

/// The default MLST fact set; `OPTS MLST` renegotiates it.
pub const DEFAULT_MLST_FACTS: [&str; 5] = ["type", "size", "modify", "perm", "unix.mode"];

/// A session behind an `Arc<Mutex>` so the control loop, command handlers
/// and data channel task can all reach it.
pub type SharedSession = Arc<Mutex<Session>>;

/// Everything one control connection carries between commands.
pub struct Session {
    /// Short id for log correlation.
    pub id: String,
    /// Session-scoped logger, pre-tagged with the id and peer.
    pub logger: Logger,
    /// The peer of the control connection.
    pub peer: SocketAddr,
    /// Our own address on the control connection.
    pub local_addr: SocketAddr,

    /// The name from `USER`, until authentication completes.
    pub username: Option<String>,
    /// The running multi-step authentication, between `USER` and its
    /// conclusion.
    pub auth_op: Option<Box<dyn AuthOperation>>,
    /// The logged-in user.
    pub user: Option<SharedUser>,
    /// The per-user TVFS engine; present once logged in.
    pub engine: Option<Engine>,

    /// Whether the control channel runs over TLS.
    pub cmd_tls: bool,
    /// Whether `PROT P` armed TLS for data connections.
    pub data_tls: bool,
    /// Whether `PBSZ 0` was issued (required before `PROT`).
    pub pbsz_done: bool,
    /// The negotiated transfer mode. Only `Stream` is enabled.
    pub data_mode: ModeParam,

    /// Restart offset from `REST`, consumed by the next transfer.
    pub start_pos: u64,
    /// Rename source from `RNFR`, consumed by `RNTO`.
    pub rename_from: Option<String>,
    /// `EPSV ALL` latch: `PORT`, `EPRT` and `PASV` are permanently refused.
    pub epsv_all: bool,

    /// Channel to the data task, once a data connection is being set up.
    pub data_cmd_tx: Option<mpsc::Sender<DataChanCmd>>,
    /// Aborts the data task.
    pub data_abort_tx: Option<mpsc::Sender<()>>,
    /// True while a transfer runs; used for the log-noise downgrade rule.
    pub data_busy: bool,

    /// Consecutive permanent failures before login; five close the session.
    pub pre_login_failures: u32,
    /// The MLST facts currently enabled.
    pub mlst_facts: Vec<String>,

    /// The session's own limiter (server-wide per-session policy).
    pub session_limiter: Arc<RateLimiter>,
    /// The compound limit both the control and data sockets charge. Swapped
    /// in place when login brings the user's and groups' limiters.
    pub shared_limits: SharedRateLimit,
}

impl Session {
    /// A fresh session for one accepted control connection.
    pub fn new(logger: Logger, peer: SocketAddr, local_addr: SocketAddr, session_limit: Limit) -> Session {
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let logger = logger.new(slog::o!("session" => id.clone(), "peer" => peer.to_string()));
        let session_limiter = RateLimiter::new(session_limit);
        let mut initial = CompoundRateLimit::new();
        initial.set_limiters(vec![session_limiter.clone()]);
        Session {
            id,
            logger,
            peer,
            local_addr,
            username: None,
            auth_op: None,
            user: None,
            engine: None,
            cmd_tls: false,
            data_tls: false,
            pbsz_done: false,
            data_mode: ModeParam::Stream,
            start_pos: 0,
            rename_from: None,
            epsv_all: false,
            data_cmd_tx: None,
            data_abort_tx: None,
            data_busy: false,
            pre_login_failures: 0,
            mlst_facts: DEFAULT_MLST_FACTS.iter().map(|s| s.to_string()).collect(),
            session_limiter,
            shared_limits: Arc::new(std::sync::Mutex::new(initial)),
        }
    }

    /// Tells whether a user is logged in.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Recomputes the compound rate limit for this session's sockets: the
    /// session's own limiter, the user's, and every group's, deduplicated.
    /// Streams already wrapping [`Session::shared_limits`] pick the change up
    /// immediately.
    pub fn update_shared_limits(&self) {
        let mut limiters = vec![self.session_limiter.clone()];
        if let Some(user) = &self.user {
            limiters.push(user.limiter());
            limiters.extend(user.extra_limiters());
        }
        self.shared_limits.lock().expect("rate limit lock").set_limiters(limiters);
    }

    /// Tears down any data-channel state.
    pub fn close_data_channel(&mut self) {
        if let Some(tx) = self.data_abort_tx.take() {
            let _ = tx.try_send(());
        }
        self.data_cmd_tx = None;
        self.data_busy = false;
    }

    /// The "expected EOF" log-verbosity rule: a disconnect without a running
    /// transfer from an authenticated, idle session is routine and logged
    /// quietly.
    pub fn disconnect_is_routine(&self) -> bool {
        self.is_authenticated() && !self.data_busy && self.data_cmd_tx.is_none()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close_data_channel();
    }
}
