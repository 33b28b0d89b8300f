//! File I/O executed as another OS user.
//!
//! The server cannot simply `setuid()` per session, so per-user file access is
//! delegated to a worker subprocess started under the target identity. The
//! parent talks to it over two inherited channels with a small self-describing
//! RPC ([`proto`]); open files travel back as real descriptors via
//! `SCM_RIGHTS`.
//!
//! [`ImpersonatorClient`] is the parent-side [`crate::tvfs::Backend`]
//! implementation; [`server::run_from_argv`] is the worker loop an embedding
//! binary dispatches into when it finds the sentinel on its argv.

pub mod client;
pub mod proto;
pub mod server;

pub use client::ImpersonatorClient;
pub use proto::ARGV_SENTINEL;
