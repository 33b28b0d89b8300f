//! The ACME certificate lifecycle daemon.
//!
//! The daemon owns the on-disk certificate/account store and drives periodic
//! renewal. It does *not* speak the ACME protocol itself: an [`AcmeClient`]
//! implementation (JWS, HTTP, challenges) is an external collaborator; only
//! its request/response contract lives here.

pub mod cert_info;
pub mod daemon;

pub use cert_info::{AcmeCertInfo, ExtraAccountInfo};
pub use daemon::{AcmeClient, CertificatePair, Daemon, DaemonOptions};

use derive_more::Display;

/// ACME daemon failures.
#[derive(Debug, Display)]
pub enum AcmeError {
    /// The store root has not been configured or is not absolute.
    #[display("certificate store root is not configured or not absolute")]
    BadRoot,
    /// A store file could not be read or written.
    #[display("certificate store I/O failed: {_0}")]
    Io(std::io::Error),
    /// A stored document could not be parsed.
    #[display("malformed store document: {_0}")]
    Malformed(String),
    /// The protocol client reported an error.
    #[display("ACME client error: {_0}")]
    Client(String),
}

impl std::error::Error for AcmeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AcmeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AcmeError {
    fn from(e: std::io::Error) -> Self {
        AcmeError::Io(e)
    }
}

/// Result type of this module.
pub type Result<T> = std::result::Result<T, AcmeError>;
