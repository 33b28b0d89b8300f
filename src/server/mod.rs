//! Contains the FTP server: listener, per-connection session, control
//! channel and data channel.

pub(crate) mod chancomms;
pub(crate) mod controlchan;
pub(crate) mod datachan;
pub(crate) mod ftpserver;
pub(crate) mod listing;
pub(crate) mod session;
pub mod shutdown;
pub(crate) mod tls;

pub(crate) use chancomms::{ControlChanMsg, DataChanCmd};
pub(crate) use controlchan::command::Command;
pub(crate) use controlchan::reply::{Reply, ReplyCode};
pub(crate) use controlchan::{ControlChanError, ControlChanErrorKind, Event};
pub(crate) use session::{Session, SharedSession};
