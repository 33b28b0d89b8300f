//! Contains the `ControlChanError` struct that defines the control channel
//! error type.

use super::line_parser::error::{ParseError, ParseErrorKind};
use crate::BoxError;

use derive_more::Display;
use thiserror::Error;

/// The error type of the control channel.
#[derive(Debug, Error)]
#[error("control channel error: {kind}")]
pub struct ControlChanError {
    kind: ControlChanErrorKind,
    #[source]
    source: Option<BoxError>,
}

/// A list specifying categories of control channel errors.
#[derive(Eq, PartialEq, Debug, Display, Clone)]
pub enum ControlChanErrorKind {
    /// We encountered a system IO error.
    #[display("failed to perform IO")]
    IoError,
    /// A line exceeded the maximum command length; the connection is
    /// rejected.
    #[display("command line too long")]
    CommandLineTooLong,
    /// We encountered a non-UTF8 character in the command.
    #[display("non-UTF8 character in command")]
    Utf8Error,
    /// The client issued a command we don't know about.
    #[display("unknown command: {}", command)]
    UnknownCommand {
        /// The verb we did not recognize.
        command: String,
    },
    /// The client issued a command we know, but with a bad or missing
    /// argument.
    #[display("invalid command (invalid parameter)")]
    InvalidCommand,
    /// The login timer or the activity timer elapsed.
    #[display("control channel timed out")]
    ControlChannelTimeout,
    /// Internal Server Error, e.g. a lock we should always be able to take.
    #[display("internal server error")]
    InternalServerError,
    /// The control channel is out of sync, e.g. a PASS with no USER.
    #[display("control channel in illegal state")]
    IllegalState,
}

impl ControlChanError {
    /// Creates a new error with the specified kind.
    pub fn new(kind: ControlChanErrorKind) -> Self {
        ControlChanError { kind, source: None }
    }

    /// The inner error kind.
    pub fn kind(&self) -> &ControlChanErrorKind {
        &self.kind
    }
}

impl From<ControlChanErrorKind> for ControlChanError {
    fn from(kind: ControlChanErrorKind) -> ControlChanError {
        ControlChanError { kind, source: None }
    }
}

impl From<std::io::Error> for ControlChanError {
    fn from(err: std::io::Error) -> ControlChanError {
        ControlChanError {
            kind: ControlChanErrorKind::IoError,
            source: Some(Box::new(err)),
        }
    }
}

impl From<std::str::Utf8Error> for ControlChanError {
    fn from(err: std::str::Utf8Error) -> ControlChanError {
        ControlChanError {
            kind: ControlChanErrorKind::Utf8Error,
            source: Some(Box::new(err)),
        }
    }
}

impl From<ParseError> for ControlChanError {
    fn from(err: ParseError) -> ControlChanError {
        let kind = match err.kind().clone() {
            ParseErrorKind::InvalidUtf8 => ControlChanErrorKind::Utf8Error,
            ParseErrorKind::UnknownCommand { command } => ControlChanErrorKind::UnknownCommand { command },
            ParseErrorKind::InvalidCommand | ParseErrorKind::MissingArgument => ControlChanErrorKind::InvalidCommand,
        };
        ControlChanError {
            kind,
            source: Some(Box::new(err)),
        }
    }
}
