//! Contains the [`Server`](crate::Server) struct used to configure and run
//! an FTP server instance.

pub mod error;
pub(crate) mod listen;
pub mod options;

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use slog::{Drain, Logger};

use crate::auth::autobanner::{AutoBanner, BanOptions};
use crate::auth::Authenticator;
use crate::net::rate_limit::Limit;
use crate::server::shutdown;
use crate::server::tls::FtpsConfig;
use error::ServerError;
use options::{PassiveHost, TlsMode, DEFAULT_GREETING, DEFAULT_IDLE_SESSION_TIMEOUT, DEFAULT_LOGIN_TIMEOUT, DEFAULT_PASSIVE_PORTS};

/// An FTP server instance, built with the fluent methods and started with
/// [`Server::listen`].
pub struct Server {
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) greeting: &'static str,
    pub(crate) passive_ports: RangeInclusive<u16>,
    pub(crate) passive_host: PassiveHost,
    pub(crate) passive_host_skip_on_lan: bool,
    pub(crate) tls_mode: TlsMode,
    pub(crate) ftps: FtpsConfig,
    pub(crate) require_data_resumption: bool,
    pub(crate) idle_session_timeout: Duration,
    pub(crate) login_timeout: Duration,
    pub(crate) per_session_limit: Limit,
    pub(crate) ban_options: BanOptions,
    pub(crate) shutdown: Option<Arc<shutdown::Notifier>>,
    pub(crate) logger: Logger,
}

impl Server {
    /// A server over the given authentication pipeline.
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Server {
        Server {
            authenticator,
            greeting: DEFAULT_GREETING,
            passive_ports: DEFAULT_PASSIVE_PORTS,
            passive_host: PassiveHost::FromConnection,
            passive_host_skip_on_lan: true,
            tls_mode: TlsMode::None,
            ftps: FtpsConfig::Off,
            require_data_resumption: false,
            idle_session_timeout: DEFAULT_IDLE_SESSION_TIMEOUT,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            per_session_limit: Limit::Unlimited,
            ban_options: BanOptions::default(),
            shutdown: None,
            logger: Logger::root(slog_stdlog::StdLog.fuse(), slog::o!()),
        }
    }

    /// Sets the greeting sent in the `220` welcome.
    pub fn greeting(mut self, greeting: &'static str) -> Server {
        self.greeting = greeting;
        self
    }

    /// Sets the port range for passive data connections.
    pub fn passive_ports(mut self, range: RangeInclusive<u16>) -> Server {
        self.passive_ports = range;
        self
    }

    /// Sets how the address in `227` replies is determined.
    pub fn passive_host<H: Into<PassiveHost>>(mut self, host: H) -> Server {
        self.passive_host = host.into();
        self
    }

    /// Whether the passive host override is skipped for loopback/LAN peers.
    pub fn passive_host_skip_on_lan(mut self, skip: bool) -> Server {
        self.passive_host_skip_on_lan = skip;
        self
    }

    /// Enables FTPS with the given PEM files and TLS mode.
    pub fn ftps<P: Into<PathBuf>>(mut self, certs_file: P, key_file: P, mode: TlsMode) -> Server {
        self.ftps = FtpsConfig::Building {
            certs_file: certs_file.into(),
            key_file: key_file.into(),
        };
        self.tls_mode = mode;
        self
    }

    /// Requires secured data connections to resume the control channel's TLS
    /// session.
    pub fn require_data_resumption(mut self, require: bool) -> Server {
        self.require_data_resumption = require;
        self
    }

    /// Sets the activity timeout.
    pub fn idle_session_timeout(mut self, timeout: Duration) -> Server {
        self.idle_session_timeout = timeout;
        self
    }

    /// Sets the login timeout.
    pub fn login_timeout(mut self, timeout: Duration) -> Server {
        self.login_timeout = timeout;
        self
    }

    /// Sets the per-session transfer speed limit.
    pub fn per_session_limit(mut self, limit: Limit) -> Server {
        self.per_session_limit = limit;
        self
    }

    /// Configures the autobanner.
    pub fn ban_policy(mut self, options: BanOptions) -> Server {
        self.ban_options = options;
        self
    }

    /// Wires a graceful-shutdown notifier. When the embedder calls
    /// [`shutdown::Notifier::notify`], the listener stops accepting, every
    /// session answers `421` and closes, and
    /// [`shutdown::Notifier::linger`] resolves once they are all gone.
    pub fn shutdown_notifier(mut self, notifier: Arc<shutdown::Notifier>) -> Server {
        self.shutdown = Some(notifier);
        self
    }

    /// Sets the logger.
    pub fn logger(mut self, logger: Logger) -> Server {
        self.logger = logger;
        self
    }

    /// Binds `bind_address` (e.g. `"0.0.0.0:2121"`) and serves until the
    /// task is dropped or a fatal listener error occurs.
    pub async fn listen<S: AsRef<str>>(mut self, bind_address: S) -> Result<(), ServerError> {
        let tls_config = self.ftps.materialize().map_err(ServerError::Tls)?;
        if matches!(self.tls_mode, TlsMode::RequireTls | TlsMode::ImplicitTls) && tls_config.is_none() {
            return Err(ServerError::TlsRequiredButNotConfigured);
        }

        let autobanner = AutoBanner::new(self.ban_options, self.logger.clone());
        listen::run(self, bind_address.as_ref(), tls_config, autobanner).await
    }
}
