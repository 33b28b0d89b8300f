//! The RFC 959 Allocate (`ALLO`) command. Storage is not preallocated.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Allo;

#[async_trait]
impl CommandHandler for Allo {
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::CommandOkayNotImplemented, "No storage allocation necessary"))
    }
}
