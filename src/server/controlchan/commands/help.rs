//! The RFC 959 `HELP` command.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new_multiline(
            ReplyCode::HelpMessage,
            ["Help:", "Commands are as described in RFC 959, 2389, 2428, 3659 and 4217.", "End"],
        ))
    }
}
