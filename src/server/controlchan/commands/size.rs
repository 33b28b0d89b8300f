//! The RFC 3659 File Size (`SIZE`) command.

use async_trait::async_trait;

use crate::server::controlchan::control_loop::reply_for_storage_error;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Size;

#[async_trait]
impl CommandHandler for Size {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Size { file } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let engine = {
            let session = args.session.lock().await;
            session.engine.clone()
        };
        let Some(engine) = engine else {
            return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first"));
        };

        match engine.get_entry(&file).await {
            Ok(entry) if entry.is_directory() => Ok(Reply::new(ReplyCode::FileError, "Not a regular file")),
            Ok(entry) => Ok(Reply::new_with_string(ReplyCode::FileStatus, entry.size.to_string())),
            Err(e) => Ok(reply_for_storage_error(&e)),
        }
    }
}
