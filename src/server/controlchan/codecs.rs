//! The CRLF codec for the control channel.

use super::line_parser;
use super::{command::Command, ControlChanError, ControlChanErrorKind, Reply};

use bytes::BytesMut;
use std::io::Write;
use tokio_util::codec::{Decoder, Encoder};

/// Lines longer than this reject the connection; no legitimate client sends
/// them.
pub const MAX_LINE_SIZE: usize = 4096;

// FtpCodec implements tokio's `Decoder` and `Encoder` traits for the control
// channel, to decode FTP commands and encode their replies.
pub struct FtpCodec {
    // Stored index of the next index to examine for a '\n' character. This
    // avoids rescanning the front of the buffer on partial reads.
    next_index: usize,
}

impl FtpCodec {
    pub fn new() -> Self {
        FtpCodec { next_index: 0 }
    }
}

impl Decoder for FtpCodec {
    type Item = Command;
    type Error = ControlChanError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Command>, Self::Error> {
        if let Some(newline_offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') {
            let newline_index = newline_offset + self.next_index;
            if newline_index + 1 > MAX_LINE_SIZE {
                return Err(ControlChanError::new(ControlChanErrorKind::CommandLineTooLong));
            }
            let line = buf.split_to(newline_index + 1);
            self.next_index = 0;
            Ok(Some(line_parser::parse(&line)?))
        } else {
            if buf.len() > MAX_LINE_SIZE {
                return Err(ControlChanError::new(ControlChanErrorKind::CommandLineTooLong));
            }
            self.next_index = buf.len();
            Ok(None)
        }
    }
}

impl Encoder<Reply> for FtpCodec {
    type Error = ControlChanError;

    // Encodes a whole reply into the buffer in one go, so a reply is atomic
    // with respect to interleaving.
    fn encode(&mut self, reply: Reply, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let mut buffer = vec![];
        match reply {
            Reply::None => {
                return Ok(());
            }
            Reply::CodeAndMsg { code, msg } => {
                if msg.is_empty() {
                    write!(buffer, "{}\r\n", code as u32)?;
                } else {
                    write!(buffer, "{} {}\r\n", code as u32, msg)?;
                }
            }
            Reply::MultiLine { code, mut lines, repeat_code } => {
                let last_line = lines.pop().unwrap_or_default();

                for (i, line) in lines.iter().enumerate() {
                    if repeat_code {
                        write!(buffer, "{}-{}\r\n", code as u32, line)?;
                    } else if i == 0 {
                        write!(buffer, "{}-{}\r\n", code as u32, line)?;
                    } else if line.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                        // Indent continuation lines that start with a digit
                        // so clients don't mistake them for the closing line.
                        write!(buffer, " {}\r\n", line)?;
                    } else {
                        write!(buffer, "{}\r\n", line)?;
                    }
                }

                write!(buffer, "{} {}\r\n", code as u32, last_line)?;
            }
        }
        buf.extend(&buffer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::controlchan::reply::ReplyCode;
    use pretty_assertions::assert_eq;

    fn encode(reply: Reply) -> String {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(reply, &mut buf).unwrap();
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn single_line_reply() {
        assert_eq!(encode(Reply::new(ReplyCode::CommandOkay, "OK")), "200 OK\r\n");
    }

    #[test]
    fn multiline_reply_opens_with_dash() {
        let reply = Reply::MultiLine {
            code: ReplyCode::SystemStatus,
            lines: vec!["first".into(), "second".into(), "end".into()],
            repeat_code: false,
        };
        let text = encode(reply);
        assert_eq!(text, "211-first\r\nsecond\r\n211 end\r\n");
    }

    #[test]
    fn repeat_code_mode_prefixes_every_line() {
        let reply = Reply::MultiLine {
            code: ReplyCode::SystemStatus,
            lines: vec!["a".into(), "b".into(), "end".into()],
            repeat_code: true,
        };
        let text = encode(reply);
        assert_eq!(text, "211-a\r\n211-b\r\n211 end\r\n");
    }

    #[test]
    fn decode_accumulates_partial_lines() {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::from(&b"NO"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"OP\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::Noop));
    }

    #[test]
    fn oversized_line_rejects_connection() {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_SIZE + 1].as_slice());
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(*err.kind(), ControlChanErrorKind::CommandLineTooLong);
    }
}
