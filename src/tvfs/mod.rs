//! The Trusted Virtual File System.
//!
//! A TVFS maps a per-user unix-style namespace onto a backend. The namespace
//! is defined by a table of mount points compiled into a [`MountTree`];
//! resolving a user-supplied path walks that tree, yielding the canonical
//! virtual path, the native path (when the mount carries one), the effective
//! [`Permissions`] and, for mount-tree nodes, the set of virtual children to
//! union into directory listings.
//!
//! The backend is pluggable: [`backend::LocalBackend`] performs direct
//! filesystem calls, while the impersonation client executes them in a
//! subprocess running as another OS user.

pub mod backend;
pub mod engine;
pub mod entry;
pub mod mount;
pub mod path;
pub mod permissions;

pub use backend::{Backend, LocalBackend, NativeInfo, OpenMode};
pub use engine::{Engine, ResolvedPath, RestartPoint, TraversalMode};
pub use entry::{EntriesIterator, Entry, EntryType};
pub use mount::{MountAccess, MountFlags, MountPoint, MountRecursion, MountTable, MountTree};
pub use permissions::Permissions;

use derive_more::Display;
use thiserror::Error;

/// Categories of TVFS and backend failures.
///
/// Raw OS error codes are preserved in the error source for logging only;
/// callers branch on the kind.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unclassified failure.
    #[display("unspecified error")]
    Other,
    /// The path is not valid in the virtual namespace.
    #[display("invalid path")]
    Invalid,
    /// The effective permissions do not allow the operation.
    #[display("permission denied")]
    NoPerm,
    /// No such file.
    #[display("no such file")]
    NoFile,
    /// No such directory, or not a directory.
    #[display("no such directory")]
    NoDir,
    /// The backend ran out of space.
    #[display("no space left")]
    NoSpace,
}

/// A TVFS failure: a kind plus the canonicalized path the operation was
/// resolved against. The path is for logging and replies; error kinds never
/// carry user-visible text.
#[derive(Debug, Error)]
#[error("{kind}: {path}")]
pub struct Error {
    kind: ErrorKind,
    path: String,
    #[source]
    source: Option<std::io::Error>,
}

impl Error {
    /// An error of `kind` concerning `path`.
    pub fn new(kind: ErrorKind, path: impl Into<String>) -> Self {
        Error {
            kind,
            path: path.into(),
            source: None,
        }
    }

    pub(crate) fn with_source(kind: ErrorKind, path: impl Into<String>, source: std::io::Error) -> Self {
        Error {
            kind,
            path: path.into(),
            source: Some(source),
        }
    }

    pub(crate) fn from_io(err: std::io::Error, path: impl Into<String>) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind() {
            Io::NotFound => ErrorKind::NoFile,
            Io::PermissionDenied => ErrorKind::NoPerm,
            Io::StorageFull => ErrorKind::NoSpace,
            Io::NotADirectory => ErrorKind::NoDir,
            Io::InvalidInput | Io::InvalidFilename => ErrorKind::Invalid,
            _ => ErrorKind::Other,
        };
        Error::with_source(kind, path, err)
    }

    /// The failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The canonicalized path the operation concerned.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Result type used throughout the TVFS.
pub type Result<T> = std::result::Result<T, Error>;
