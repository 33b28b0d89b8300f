use super::error::ParseErrorKind;
use super::parser::parse;
use super::Password;
use crate::server::controlchan::command::{AuthParam, Command, ModeParam, Opt, ProtParam, TypeParam};
use pretty_assertions::assert_eq;

fn parse_ok(line: &str) -> Command {
    parse(line.as_bytes()).unwrap()
}

#[test]
fn verbs_are_case_insensitive() {
    assert_eq!(parse_ok("noop\r\n"), Command::Noop);
    assert_eq!(parse_ok("NoOp\r\n"), Command::Noop);
    assert_eq!(parse_ok("NOOP\r\n"), Command::Noop);
}

#[test]
fn user_requires_an_argument() {
    assert_eq!(
        parse_ok("USER alice\r\n"),
        Command::User {
            username: "alice".into()
        }
    );
    let err = parse(b"USER\r\n").unwrap_err();
    assert_eq!(*err.kind(), ParseErrorKind::MissingArgument);
}

#[test]
fn pass_keeps_the_argument_verbatim() {
    assert_eq!(
        parse_ok("PASS  spacey pass \r\n"),
        Command::Pass {
            password: Password::new(" spacey pass ")
        }
    );
}

#[test]
fn arguments_are_trimmed() {
    assert_eq!(parse_ok("CWD   /pub  \r\n"), Command::Cwd { path: "/pub".into() });
}

#[test]
fn type_and_mode_params() {
    assert_eq!(parse_ok("TYPE I\r\n"), Command::Type { param: TypeParam::Image });
    assert_eq!(parse_ok("TYPE A N\r\n"), Command::Type { param: TypeParam::Ascii });
    assert_eq!(parse_ok("MODE Z\r\n"), Command::Mode { mode: ModeParam::Deflate });
}

#[test]
fn list_splits_switches_from_path() {
    assert_eq!(
        parse_ok("LIST -la /pub\r\n"),
        Command::List {
            options: Some("-la".into()),
            path: Some("/pub".into())
        }
    );
    assert_eq!(
        parse_ok("LIST -la\r\n"),
        Command::List {
            options: Some("-la".into()),
            path: None
        }
    );
    assert_eq!(parse_ok("LIST\r\n"), Command::List { options: None, path: None });
}

#[test]
fn rest_parses_the_offset() {
    assert_eq!(parse_ok("REST 1024\r\n"), Command::Rest { offset: 1024 });
    let err = parse(b"REST many\r\n").unwrap_err();
    assert_eq!(*err.kind(), ParseErrorKind::InvalidCommand);
}

#[test]
fn mfmt_validates_the_timestamp() {
    assert_eq!(
        parse_ok("MFMT 20190715103000 /x.txt\r\n"),
        Command::Mfmt {
            timestamp: "20190715103000".into(),
            file: "/x.txt".into()
        }
    );
    let err = parse(b"MFMT 2019 /x.txt\r\n").unwrap_err();
    assert_eq!(*err.kind(), ParseErrorKind::InvalidCommand);
}

#[test]
fn opts_utf8_and_mlst() {
    assert_eq!(
        parse_ok("OPTS UTF8 ON\r\n"),
        Command::Opts {
            option: Opt::Utf8 { on: true }
        }
    );
    assert_eq!(
        parse_ok("OPTS MLST type;size;modify;\r\n"),
        Command::Opts {
            option: Opt::MlstFacts {
                facts: vec!["type".into(), "size".into(), "modify".into()]
            }
        }
    );
}

#[test]
fn auth_accepts_tls_and_ssl() {
    assert_eq!(parse_ok("AUTH TLS\r\n"), Command::Auth { protocol: AuthParam::Tls });
    assert_eq!(parse_ok("AUTH SSL\r\n"), Command::Auth { protocol: AuthParam::Tls });
    assert_eq!(
        parse_ok("AUTH KERBEROS\r\n"),
        Command::Auth {
            protocol: AuthParam::Other
        }
    );
}

#[test]
fn prot_levels() {
    assert_eq!(parse_ok("PROT P\r\n"), Command::Prot { param: ProtParam::Private });
    assert_eq!(parse_ok("PROT c\r\n"), Command::Prot { param: ProtParam::Clear });
}

#[test]
fn unknown_verb_is_reported_with_its_name() {
    let err = parse(b"FROB x\r\n").unwrap_err();
    assert_eq!(
        *err.kind(),
        ParseErrorKind::UnknownCommand {
            command: "FROB".into()
        }
    );
}

#[test]
fn non_utf8_is_rejected() {
    let err = parse(&[b'C', b'W', b'D', b' ', 0xff, b'\r', b'\n']).unwrap_err();
    assert_eq!(*err.kind(), ParseErrorKind::InvalidUtf8);
}

#[test]
fn epsv_all_latch_argument() {
    assert_eq!(parse_ok("EPSV ALL\r\n"), Command::Epsv { arg: Some("ALL".into()) });
    assert_eq!(parse_ok("EPSV\r\n"), Command::Epsv { arg: None });
}
