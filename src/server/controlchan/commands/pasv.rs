//! The RFC 959 Passive (`PASV`) command.

use async_trait::async_trait;

use super::passive_common::setup_passive;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Pasv;

#[async_trait]
impl CommandHandler for Pasv {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        if args.session.lock().await.epsv_all {
            return Ok(Reply::new(ReplyCode::CommandSyntaxError, "PASV is disabled after EPSV ALL"));
        }
        Ok(setup_passive(args, false).await)
    }
}
