//! The RFC 959 Transfer Mode (`MODE`) command.
//!
//! Only Stream is enabled. `MODE Z` is advertised for clients that probe for
//! it, but answers "not enabled".

use async_trait::async_trait;

use crate::server::controlchan::command::ModeParam;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Mode;

#[async_trait]
impl CommandHandler for Mode {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Mode { mode } = args.parsed_command else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };
        match mode {
            ModeParam::Stream => {
                args.session.lock().await.data_mode = ModeParam::Stream;
                Ok(Reply::new(ReplyCode::CommandOkay, "Using Stream mode"))
            }
            ModeParam::Deflate => Ok(Reply::new(
                ReplyCode::CommandNotImplementedForParameter,
                "MODE Z is not enabled",
            )),
            _ => Ok(Reply::new(
                ReplyCode::CommandNotImplementedForParameter,
                "Only Stream mode is supported",
            )),
        }
    }
}
