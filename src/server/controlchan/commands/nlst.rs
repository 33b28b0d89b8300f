//! The RFC 959 Name List (`NLST`) command.

use async_trait::async_trait;

use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Nlst;

#[async_trait]
impl CommandHandler for Nlst {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Nlst { path } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let mut session = args.session.lock().await;
        match session.data_cmd_tx.take() {
            Some(tx) => {
                let logger = session.logger.clone();
                tokio::spawn(async move {
                    if let Err(e) = tx.send(DataChanCmd::Nlst { path }).await {
                        slog::warn!(logger, "could not hand NLST to the data channel"; "error" => %e);
                    }
                });
                Ok(Reply::new(ReplyCode::FileStatusOkay, "Sending name list"))
            }
            None => Ok(Reply::new(ReplyCode::CantOpenDataConnection, "No data connection established")),
        }
    }
}
