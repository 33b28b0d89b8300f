//! The RFC 959 Retrieve (`RETR`) command.

use async_trait::async_trait;

use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Retr;

#[async_trait]
impl CommandHandler for Retr {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Retr { path } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let mut session = args.session.lock().await;
        let start_pos = std::mem::take(&mut session.start_pos);

        match session.data_cmd_tx.take() {
            Some(tx) => {
                let logger = session.logger.clone();
                tokio::spawn(async move {
                    if let Err(e) = tx.send(DataChanCmd::Retr { path, start_pos }).await {
                        slog::warn!(logger, "could not hand RETR to the data channel"; "error" => %e);
                    }
                });
                Ok(Reply::new(ReplyCode::FileStatusOkay, "Sending data"))
            }
            None => Ok(Reply::new(ReplyCode::CantOpenDataConnection, "No data connection established")),
        }
    }
}
