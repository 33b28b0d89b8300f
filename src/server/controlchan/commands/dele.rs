//! The RFC 959 Delete (`DELE`) command.

use async_trait::async_trait;

use crate::server::controlchan::control_loop::reply_for_storage_error;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Dele;

#[async_trait]
impl CommandHandler for Dele {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Dele { path } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let engine = {
            let session = args.session.lock().await;
            session.engine.clone()
        };
        let Some(engine) = engine else {
            return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first"));
        };

        match engine.remove_file(&path).await {
            Ok(()) => Ok(Reply::new(ReplyCode::FileActionOkay, "File removed")),
            Err(e) => Ok(reply_for_storage_error(&e)),
        }
    }
}
