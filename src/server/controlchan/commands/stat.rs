//! The RFC 959 Status (`STAT`) command: server status, or a listing over the
//! control channel.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};
use crate::server::listing;
use crate::tvfs::TraversalMode;

#[derive(Debug)]
pub struct Stat;

#[async_trait]
impl CommandHandler for Stat {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Stat { path } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let session = args.session.lock().await;

        let Some(path) = path else {
            let lines = vec![
                "ironftpd server status:".to_string(),
                format!("Connected from {} to {}", session.peer, session.local_addr),
                match (&session.user, &session.username) {
                    (Some(user), _) => format!("Logged in as {}", user.name().unwrap_or_default()),
                    (None, Some(name)) => format!("USER {} awaiting password", name),
                    (None, None) => "Not logged in".to_string(),
                },
                format!("TLS on control channel: {}", if session.cmd_tls { "yes" } else { "no" }),
                format!("Transfer mode: {:?}", session.data_mode),
                "End of status".to_string(),
            ];
            return Ok(Reply::new_multiline(ReplyCode::SystemStatus, lines));
        };

        // A path was given: produce the listing inline on the control
        // channel.
        let Some(engine) = session.engine.clone() else {
            return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first"));
        };
        drop(session);

        match engine.get_entries(&path, TraversalMode::Autodetect).await {
            Ok(entries) => {
                let mut lines = vec![format!("Status of {}:", path)];
                lines.extend(entries.map(|e| listing::unix_long_line(&e)));
                lines.push("End of status".to_string());
                Ok(Reply::new_multiline(ReplyCode::FileStatus, lines))
            }
            Err(e) => Ok(crate::server::controlchan::control_loop::reply_for_storage_error(&e)),
        }
    }
}
