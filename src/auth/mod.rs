//! The layered authentication pipeline.
//!
//! From the outside in: the [`autobanner::AutoBanner`] refuses connections
//! from repeat offenders before a greeting is even sent; the
//! [`throttler::ThrottledAuthenticator`] injects growing delays per user and
//! per source address; the [`file_based::FileBasedAuthenticator`] finally
//! verifies credentials against the configured accounts and hands out a
//! long-lived [`SharedUser`].
//!
//! Authentication is method-driven and multi-step: the caller receives an
//! [`AuthOperation`] and keeps calling [`AuthOperation::next`] with the
//! methods it can offer until a user is produced or an error is returned.

pub mod autobanner;
pub mod authenticator;
pub mod file_based;
pub mod shared_user;
pub mod throttler;
pub mod user;

pub use authenticator::{AuthOperation, AuthOutcome, AuthRequest, Authenticator};
pub use shared_user::SharedUser;
pub use user::{Group, ImpersonationToken, User};

use derive_more::Display;

/// Why an authentication attempt was denied.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The account exists but is disabled.
    #[display("user is disabled")]
    UserDisabled,
    /// No such account.
    #[display("user does not exist")]
    UserNonExisting,
    /// The source address is not allowed for this account.
    #[display("address not allowed")]
    IpDisallowed,
    /// None of the offered methods is supported for this account.
    #[display("authentication method not supported")]
    AuthMethodNotSupported,
    /// The credentials did not verify.
    #[display("invalid credentials")]
    InvalidCredentials,
    /// An internal invariant failed; the administrator should investigate.
    #[display("internal error")]
    Internal,
}

impl std::error::Error for Error {}

/// A credential the client actually supplies.
#[derive(Clone, PartialEq, Eq)]
pub enum Method {
    /// No credentials at all; probing, or an account without a password.
    None,
    /// A cleartext password (over the secured control channel).
    Password(String),
}

impl Method {
    /// The kind of this method.
    pub fn kind(&self) -> MethodKind {
        match self {
            Method::None => MethodKind::None,
            Method::Password(_) => MethodKind::Password,
        }
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never let a password reach a log line.
        match self {
            Method::None => write!(f, "None"),
            Method::Password(_) => write!(f, "Password(***)"),
        }
    }
}

/// The kind of an authentication method, for advertising what is still
/// required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// No credentials.
    None,
    /// A password.
    Password,
}
