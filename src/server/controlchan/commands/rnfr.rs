//! The RFC 959 Rename From (`RNFR`) command.

use async_trait::async_trait;

use crate::server::controlchan::control_loop::reply_for_storage_error;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Rnfr;

#[async_trait]
impl CommandHandler for Rnfr {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Rnfr { file } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let engine = {
            let session = args.session.lock().await;
            session.engine.clone()
        };
        let Some(engine) = engine else {
            return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first"));
        };

        // The source must exist before we ask for the target.
        match engine.get_entry(&file).await {
            Ok(_) => {
                args.session.lock().await.rename_from = Some(file);
                Ok(Reply::new(ReplyCode::FileActionPending, "Tell me the new name"))
            }
            Err(e) => Ok(reply_for_storage_error(&e)),
        }
    }
}
