//! The RFC 959 Logout (`QUIT`) command.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};
use crate::server::ControlChanMsg;

#[derive(Debug)]
pub struct Quit;

#[async_trait]
impl CommandHandler for Quit {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        // The loop closes the connection when it sees the message; the 221
        // goes out first.
        if args.tx_control_chan.send(ControlChanMsg::Quit).await.is_err() {
            return Ok(Reply::new(ReplyCode::LocalError, "Internal error"));
        }
        Ok(Reply::new(ReplyCode::ClosingControlConnection, "Goodbye"))
    }
}
