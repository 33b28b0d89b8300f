//! Typed messages between the data channel tasks and the control loop.

use crate::tvfs;

/// What the data-channel task reports back to the per-connection control
/// loop. The control loop turns these into replies.
#[derive(Debug)]
pub enum ControlChanMsg {
    /// A retrieve finished; this many bytes went out.
    SentData {
        /// Bytes transferred.
        bytes: u64,
    },
    /// A store finished; this many bytes were written to the backend.
    WrittenData {
        /// Bytes transferred.
        bytes: u64,
    },
    /// A directory listing was fully sent.
    DirectorySuccessfullyListed,
    /// The TVFS refused or failed the operation.
    StorageError(tvfs::Error),
    /// The peer connecting to the data socket was not the control peer.
    DataPeerMismatch,
    /// Securing the data channel failed (handshake error or missing session
    /// resumption).
    DataTlsFailed,
    /// The data connection died mid-transfer.
    ConnectionReset,
    /// The transfer was aborted by `ABOR`.
    TransferAborted,
    /// No client connected to the passive socket in time.
    DataConnectionTimedOut,
    /// `AUTH TLS` accepted: upgrade the control channel now that the reply
    /// has been flushed.
    SecureControlChannel,
    /// Close the control connection (after `QUIT`'s reply went out).
    Quit,
}

/// What the control loop asks the data channel to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChanCmd {
    /// Send a file to the client.
    Retr {
        /// Virtual path.
        path: String,
        /// Restart offset from a preceding `REST`.
        start_pos: u64,
    },
    /// Receive a file from the client.
    Stor {
        /// Virtual path.
        path: String,
        /// Restart offset from a preceding `REST`.
        start_pos: u64,
    },
    /// Receive a file, appending to what is there.
    Appe {
        /// Virtual path.
        path: String,
    },
    /// Send a long-format listing.
    List {
        /// Virtual path; the current directory when absent.
        path: Option<String>,
    },
    /// Send a name-only listing.
    Nlst {
        /// Virtual path; the current directory when absent.
        path: Option<String>,
    },
    /// Send an RFC 3659 machine listing.
    Mlsd {
        /// Virtual path; the current directory when absent.
        path: Option<String>,
    },
}
