//! The RFC 959 Print Working Directory (`PWD`) command.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Pwd;

#[async_trait]
impl CommandHandler for Pwd {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let session = args.session.lock().await;
        let Some(engine) = &session.engine else {
            return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first"));
        };
        // Double-quoted per RFC 959; quotes in the path itself are doubled.
        let cwd = engine.current_directory().replace('"', "\"\"");
        Ok(Reply::new_with_string(ReplyCode::DirCreated, format!("\"{}\"", cwd)))
    }
}
