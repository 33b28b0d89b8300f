//! The RFC 959 Rename To (`RNTO`) command.

use async_trait::async_trait;

use crate::server::controlchan::control_loop::reply_for_storage_error;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Rnto;

#[async_trait]
impl CommandHandler for Rnto {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Rnto { file } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let (engine, rename_from) = {
            let mut session = args.session.lock().await;
            (session.engine.clone(), session.rename_from.take())
        };
        let Some(engine) = engine else {
            return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first"));
        };
        let Some(from) = rename_from else {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Send RNFR first"));
        };

        match engine.rename(&from, &file).await {
            Ok(()) => Ok(Reply::new(ReplyCode::FileActionOkay, "Renamed")),
            Err(e) => Ok(reply_for_storage_error(&e)),
        }
    }
}
