#![deny(clippy::all)]
#![deny(missing_docs)]

//! ironftpd is the core of a secure, multi-user, async FTP(S) server.
//!
//! It bundles four tightly coupled subsystems:
//!
//! - an FTP **session and command state machine** implementing RFC 959 plus
//!   the modern extension set (EPSV/EPRT, MLST/MLSD, UTF-8, AUTH TLS, PBSZ,
//!   PROT, REST, SIZE, MDTM, MFMT),
//! - a layered **authentication pipeline**: a file-backed credential store,
//!   per-IP/per-user throttling with exponential backoff, and an automatic
//!   banner for abusive sources,
//! - a **trusted virtual file system** (TVFS) that maps a per-user unix-style
//!   namespace onto a backend, either the local filesystem or an isolated
//!   impersonation subprocess,
//! - an **ACME certificate daemon** that owns the on-disk certificate store
//!   and drives renewals.
//!
//! It runs on top of the Tokio asynchronous run-time and tries to make use of
//! Async IO as much as possible.
//!
//! # Quick Start
//!
//! ```no_run
//! use ironftpd::auth::file_based::FileBasedAuthenticator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! pub async fn main() {
//!     let authenticator = FileBasedAuthenticator::builder().build();
//!     let server = ironftpd::Server::new(Arc::new(authenticator))
//!         .greeting("Welcome to my FTP server")
//!         .passive_ports(50000..=65534);
//!
//!     server.listen("127.0.0.1:2121").await.unwrap();
//! }
//! ```

pub mod acme;
pub mod auth;
pub mod config;
#[cfg(unix)]
pub mod impersonation;
pub mod net;
pub mod receiver;
pub(crate) mod server;
pub mod tvfs;

pub use crate::server::ftpserver::{error::ServerError, options, Server};
pub use crate::server::shutdown;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
