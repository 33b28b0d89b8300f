//! The RFC 959 Store (`STOR`) command.

use async_trait::async_trait;

use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Stor;

#[async_trait]
impl CommandHandler for Stor {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Stor { path } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let mut session = args.session.lock().await;
        let start_pos = std::mem::take(&mut session.start_pos);

        match session.data_cmd_tx.take() {
            Some(tx) => {
                let logger = session.logger.clone();
                tokio::spawn(async move {
                    if let Err(e) = tx.send(DataChanCmd::Stor { path, start_pos }).await {
                        slog::warn!(logger, "could not hand STOR to the data channel"; "error" => %e);
                    }
                });
                Ok(Reply::new(ReplyCode::FileStatusOkay, "Ready to receive data"))
            }
            None => Ok(Reply::new(ReplyCode::CantOpenDataConnection, "No data connection established")),
        }
    }
}
