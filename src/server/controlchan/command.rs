//! The parsed form of a client command.

use std::fmt;

/// The protocol requested with `AUTH`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AuthParam {
    /// `AUTH TLS` (and the `AUTH SSL` alias).
    Tls,
    /// Anything else; refused.
    Other,
}

/// The data channel protection level requested with `PROT`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProtParam {
    /// 'C' - Clear.
    Clear,
    /// 'S' - Safe: integrity without privacy. Not supported.
    Safe,
    /// 'E' - Confidential: privacy without integrity. Not supported.
    Confidential,
    /// 'P' - Private: integrity and privacy.
    Private,
}

/// The transfer mode requested with `MODE`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ModeParam {
    /// Stream mode; the only one actually enabled.
    Stream,
    /// Block mode.
    Block,
    /// Compressed mode.
    Compressed,
    /// Deflate mode (`MODE Z`): advertised, never enabled.
    Deflate,
}

/// The file structure requested with `STRU`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StruParam {
    /// File structure; the only one supported.
    File,
    /// Record structure.
    Record,
    /// Page structure.
    Page,
}

/// The representation type requested with `TYPE`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TypeParam {
    /// ASCII.
    Ascii,
    /// Image, i.e. binary.
    Image,
}

/// An `OPTS` option.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Opt {
    /// `OPTS UTF8 ON|OFF`.
    Utf8 {
        /// Whether the client asked to turn it on.
        on: bool,
    },
    /// `OPTS MLST fact;fact;...`: negotiate the emitted fact set.
    MlstFacts {
        /// The requested fact names, lowercased.
        facts: Vec<String>,
    },
}

/// A fully parsed control-channel command.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Command {
    /// `USER <name>`
    User {
        /// The login name.
        username: String,
    },
    /// `PASS <password>`
    Pass {
        /// The password. Deliberately not `Debug`-printed.
        password: crate::server::controlchan::line_parser::Password,
    },
    /// `QUIT`
    Quit,
    /// `SYST`
    Syst,
    /// `STAT [path]`
    Stat {
        /// Path to report on; server status when absent.
        path: Option<String>,
    },
    /// `TYPE A|I`
    Type {
        /// The requested representation type.
        param: TypeParam,
    },
    /// `STRU F|R|P`
    Stru {
        /// The requested structure.
        structure: StruParam,
    },
    /// `MODE S|B|C|Z`
    Mode {
        /// The requested mode.
        mode: ModeParam,
    },
    /// `HELP`
    Help,
    /// `NOOP`
    Noop,
    /// `ACCT <account>`
    Acct,
    /// `PWD`
    Pwd,
    /// `CWD <path>`
    Cwd {
        /// Target directory.
        path: String,
    },
    /// `CDUP`
    Cdup,
    /// `MKD <path>`
    Mkd {
        /// Directory to create.
        path: String,
    },
    /// `RMD <path>`
    Rmd {
        /// Directory to remove.
        path: String,
    },
    /// `DELE <path>`
    Dele {
        /// File to remove.
        path: String,
    },
    /// `RNFR <path>`
    Rnfr {
        /// Rename source.
        file: String,
    },
    /// `RNTO <path>`
    Rnto {
        /// Rename target.
        file: String,
    },
    /// `LIST [options] [path]`
    List {
        /// Switches like `-la`; accepted and ignored.
        options: Option<String>,
        /// Path to list.
        path: Option<String>,
    },
    /// `NLST [path]`
    Nlst {
        /// Path to list.
        path: Option<String>,
    },
    /// `MLST [path]`
    Mlst {
        /// Path to report; the current directory when absent.
        path: Option<String>,
    },
    /// `MLSD [path]`
    Mlsd {
        /// Path to list.
        path: Option<String>,
    },
    /// `SIZE <path>`
    Size {
        /// File to size.
        file: String,
    },
    /// `MDTM <path>`
    Mdtm {
        /// File to query.
        file: String,
    },
    /// `MFMT <YYYYMMDDhhmmss> <path>`
    Mfmt {
        /// The new modification time.
        timestamp: String,
        /// File to touch.
        file: String,
    },
    /// `REST <offset>`
    Rest {
        /// Byte offset for the next transfer.
        offset: u64,
    },
    /// `RETR <path>`
    Retr {
        /// File to send.
        path: String,
    },
    /// `STOR <path>`
    Stor {
        /// File to receive.
        path: String,
    },
    /// `APPE <path>`
    Appe {
        /// File to append to.
        path: String,
    },
    /// `STOU`
    Stou,
    /// `ALLO [size]`
    Allo,
    /// `ABOR`
    Abor,
    /// `PORT h1,h2,h3,h4,p1,p2`
    Port {
        /// The raw argument; parsed by the handler.
        addr: String,
    },
    /// `EPRT <sep><type><sep><addr><sep><port><sep>`
    Eprt {
        /// The raw argument; parsed by the handler.
        addr: String,
    },
    /// `PASV`
    Pasv,
    /// `EPSV [ALL|proto]`
    Epsv {
        /// The argument, e.g. `ALL`.
        arg: Option<String>,
    },
    /// `FEAT`
    Feat,
    /// `OPTS <option>`
    Opts {
        /// The parsed option.
        option: Opt,
    },
    /// `AUTH TLS|SSL|<other>`
    Auth {
        /// The requested protocol.
        protocol: AuthParam,
    },
    /// `PBSZ <size>`
    Pbsz {
        /// The announced buffer size; must be 0 for TLS.
        size: u64,
    },
    /// `PROT C|S|E|P`
    Prot {
        /// The requested level.
        param: ProtParam,
    },
    /// `CCC`
    Ccc,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
