//! The RFC 3659 Machine List Single (`MLST`) command. No data connection:
//! the facts come back on the control channel.

use async_trait::async_trait;

use crate::server::controlchan::control_loop::reply_for_storage_error;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};
use crate::server::listing;

#[derive(Debug)]
pub struct Mlst;

#[async_trait]
impl CommandHandler for Mlst {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Mlst { path } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let (engine, facts) = {
            let session = args.session.lock().await;
            (session.engine.clone(), session.mlst_facts.clone())
        };
        let Some(engine) = engine else {
            return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first"));
        };

        let target = path.unwrap_or_else(|| engine.current_directory());
        match engine.get_entry(&target).await {
            Ok(entry) => Ok(Reply::new_multiline(
                ReplyCode::FileActionOkay,
                [
                    format!("Listing {}", entry.tvfs_name),
                    format!(" {}", listing::mlsx_line(&entry, &facts, true)),
                    "End".to_string(),
                ],
            )),
            Err(e) => Ok(reply_for_storage_error(&e)),
        }
    }
}
