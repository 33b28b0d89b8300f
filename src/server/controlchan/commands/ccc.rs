//! The RFC 4217 Clear Command Channel (`CCC`) command. Refused: once
//! secured, the control channel stays secured.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Ccc;

#[async_trait]
impl CommandHandler for Ccc {
    #[tracing_attributes::instrument]
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::RefusedSecurityLevel, "The control channel stays secured"))
    }
}
