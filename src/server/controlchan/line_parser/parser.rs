//! The actual verb dispatch.

use super::error::{ParseError, ParseErrorKind};
use super::Password;
use crate::server::controlchan::command::{AuthParam, Command, ModeParam, Opt, ProtParam, StruParam, TypeParam};

/// Parses one raw line (including its CRLF) into a [`Command`].
pub fn parse(line: &[u8]) -> Result<Command, ParseError> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError::new(ParseErrorKind::InvalidUtf8))?;
    let text = text.trim_end_matches(['\r', '\n']);

    let (verb, rest) = match text.find(' ') {
        Some(pos) => (&text[..pos], &text[pos + 1..]),
        None => (text, ""),
    };
    let verb = verb.to_ascii_uppercase();

    // Most commands want their argument trimmed; PASS keeps it verbatim so
    // passwords with leading or trailing blanks survive.
    let arg = rest.trim();
    let required = |arg: &str| -> Result<String, ParseError> {
        if arg.is_empty() {
            Err(ParseError::new(ParseErrorKind::MissingArgument))
        } else {
            Ok(arg.to_string())
        }
    };
    let optional = |arg: &str| -> Option<String> {
        if arg.is_empty() {
            None
        } else {
            Some(arg.to_string())
        }
    };

    let command = match verb.as_str() {
        "USER" => Command::User {
            username: required(arg)?,
        },
        "PASS" => Command::Pass {
            password: Password::new(rest),
        },
        "QUIT" => Command::Quit,
        "SYST" => Command::Syst,
        "STAT" => Command::Stat { path: optional(arg) },
        "TYPE" => {
            let mut chars = arg.chars();
            match chars.next().map(|c| c.to_ascii_uppercase()) {
                Some('A') => Command::Type { param: TypeParam::Ascii },
                Some('I') => Command::Type { param: TypeParam::Image },
                _ => return Err(ParseError::new(ParseErrorKind::InvalidCommand)),
            }
        }
        "STRU" => match arg.to_ascii_uppercase().as_str() {
            "F" => Command::Stru { structure: StruParam::File },
            "R" => Command::Stru {
                structure: StruParam::Record,
            },
            "P" => Command::Stru { structure: StruParam::Page },
            _ => return Err(ParseError::new(ParseErrorKind::InvalidCommand)),
        },
        "MODE" => match arg.to_ascii_uppercase().as_str() {
            "S" => Command::Mode { mode: ModeParam::Stream },
            "B" => Command::Mode { mode: ModeParam::Block },
            "C" => Command::Mode {
                mode: ModeParam::Compressed,
            },
            "Z" => Command::Mode { mode: ModeParam::Deflate },
            _ => return Err(ParseError::new(ParseErrorKind::InvalidCommand)),
        },
        "HELP" => Command::Help,
        "NOOP" => Command::Noop,
        "ACCT" => Command::Acct,
        "PWD" | "XPWD" => Command::Pwd,
        "CWD" | "XCWD" => Command::Cwd { path: required(arg)? },
        "CDUP" => Command::Cdup,
        "MKD" | "XMKD" => Command::Mkd { path: required(arg)? },
        "RMD" | "XRMD" => Command::Rmd { path: required(arg)? },
        "DELE" => Command::Dele { path: required(arg)? },
        "RNFR" => Command::Rnfr { file: required(arg)? },
        "RNTO" => Command::Rnto { file: required(arg)? },
        "LIST" => {
            // Switches like `-la` come first; everything after is the path.
            let mut options = None;
            let mut path = optional(arg);
            if let Some(candidate) = &path {
                if let Some(stripped) = candidate.strip_prefix('-') {
                    match stripped.find(' ') {
                        Some(pos) => {
                            options = Some(candidate[..pos + 1].trim().to_string());
                            path = optional(candidate[pos + 1..].trim());
                        }
                        None => {
                            options = path.take();
                        }
                    }
                }
            }
            Command::List { options, path }
        }
        "NLST" => Command::Nlst { path: optional(arg) },
        "MLST" => Command::Mlst { path: optional(arg) },
        "MLSD" => Command::Mlsd { path: optional(arg) },
        "SIZE" => Command::Size { file: required(arg)? },
        "MDTM" => Command::Mdtm { file: required(arg)? },
        "MFMT" => {
            let arg = required(arg)?;
            let (timestamp, file) = arg
                .split_once(' ')
                .ok_or_else(|| ParseError::new(ParseErrorKind::InvalidCommand))?;
            if timestamp.len() != 14 || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::new(ParseErrorKind::InvalidCommand));
            }
            Command::Mfmt {
                timestamp: timestamp.to_string(),
                file: file.trim().to_string(),
            }
        }
        "REST" => {
            let offset = required(arg)?
                .parse::<u64>()
                .map_err(|_| ParseError::new(ParseErrorKind::InvalidCommand))?;
            Command::Rest { offset }
        }
        "RETR" => Command::Retr { path: required(arg)? },
        "STOR" => Command::Stor { path: required(arg)? },
        "APPE" => Command::Appe { path: required(arg)? },
        "STOU" => Command::Stou,
        "ALLO" => Command::Allo,
        "ABOR" => Command::Abor,
        "PORT" => Command::Port { addr: required(arg)? },
        "EPRT" => Command::Eprt { addr: required(arg)? },
        "PASV" => Command::Pasv,
        "EPSV" => Command::Epsv { arg: optional(arg) },
        "FEAT" => Command::Feat,
        "OPTS" => {
            let arg = required(arg)?;
            let (name, value) = match arg.split_once(' ') {
                Some((n, v)) => (n, v.trim()),
                None => (arg.as_str(), ""),
            };
            match name.to_ascii_uppercase().as_str() {
                "UTF8" => match value.to_ascii_uppercase().as_str() {
                    "ON" => Command::Opts {
                        option: Opt::Utf8 { on: true },
                    },
                    "OFF" => Command::Opts {
                        option: Opt::Utf8 { on: false },
                    },
                    _ => return Err(ParseError::new(ParseErrorKind::InvalidCommand)),
                },
                "MLST" => Command::Opts {
                    option: Opt::MlstFacts {
                        facts: value
                            .split(';')
                            .filter(|f| !f.is_empty())
                            .map(|f| f.trim().to_ascii_lowercase())
                            .collect(),
                    },
                },
                _ => return Err(ParseError::new(ParseErrorKind::InvalidCommand)),
            }
        }
        "AUTH" => match arg.to_ascii_uppercase().as_str() {
            "TLS" | "SSL" => Command::Auth { protocol: AuthParam::Tls },
            _ => Command::Auth {
                protocol: AuthParam::Other,
            },
        },
        "PBSZ" => {
            let size = required(arg)?
                .parse::<u64>()
                .map_err(|_| ParseError::new(ParseErrorKind::InvalidCommand))?;
            Command::Pbsz { size }
        }
        "PROT" => match arg.to_ascii_uppercase().as_str() {
            "C" => Command::Prot { param: ProtParam::Clear },
            "S" => Command::Prot { param: ProtParam::Safe },
            "E" => Command::Prot {
                param: ProtParam::Confidential,
            },
            "P" => Command::Prot { param: ProtParam::Private },
            _ => return Err(ParseError::new(ParseErrorKind::InvalidCommand)),
        },
        "CCC" => Command::Ccc,
        _ => {
            return Err(ParseError::new(ParseErrorKind::UnknownCommand { command: verb }));
        }
    };

    Ok(command)
}
