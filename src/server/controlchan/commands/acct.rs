//! The RFC 959 Account (`ACCT`) command. Accounts are not a thing here.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Acct;

#[async_trait]
impl CommandHandler for Acct {
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::CommandOkayNotImplemented, "Account not required"))
    }
}
