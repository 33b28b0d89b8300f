//! The RFC 959 File Structure (`STRU`) command. Only `F` is supported.

use async_trait::async_trait;

use crate::server::controlchan::command::StruParam;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Stru;

#[async_trait]
impl CommandHandler for Stru {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Stru { structure } = args.parsed_command else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };
        match structure {
            StruParam::File => Ok(Reply::new(ReplyCode::CommandOkay, "Structure set to File")),
            _ => Ok(Reply::new(
                ReplyCode::CommandNotImplementedForParameter,
                "Only File structure is supported",
            )),
        }
    }
}
