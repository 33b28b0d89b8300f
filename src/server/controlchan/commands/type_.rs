//! The RFC 959 Representation Type (`TYPE`) command. Both A and I are
//! accepted; transfers are byte-exact either way.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Type;

#[async_trait]
impl CommandHandler for Type {
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::CommandOkay, "Type OK"))
    }
}
