//! Line parser errors.

use derive_more::Display;
use thiserror::Error;

/// A failure to parse one command line.
#[derive(Debug, Error)]
#[error("parse error: {kind}")]
pub struct ParseError {
    kind: ParseErrorKind,
}

/// The categories of parse failures.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The line is not valid UTF-8.
    #[display("invalid UTF-8")]
    InvalidUtf8,
    /// The verb is not one we know.
    #[display("unknown command {:?}", command)]
    UnknownCommand {
        /// The verb, uppercased.
        command: String,
    },
    /// The verb requires an argument and none was given.
    #[display("missing argument")]
    MissingArgument,
    /// The argument is malformed.
    #[display("invalid argument")]
    InvalidCommand,
}

impl ParseError {
    /// An error of the given kind.
    pub fn new(kind: ParseErrorKind) -> ParseError {
        ParseError { kind }
    }

    /// The category.
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }
}

impl From<ParseErrorKind> for ParseError {
    fn from(kind: ParseErrorKind) -> ParseError {
        ParseError { kind }
    }
}
