//! Server-level errors.

use thiserror::Error;

/// What can go wrong bringing a server up.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The bind address did not parse or could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    /// Certificate or key material could not be loaded.
    #[error("TLS configuration failed: {0}")]
    Tls(#[source] std::io::Error),
    /// A TLS-requiring mode was chosen without certificates.
    #[error("TLS mode requires certificates but none were configured")]
    TlsRequiredButNotConfigured,
}
