//! The RFC 3659 Machine List Directory (`MLSD`) command.

use async_trait::async_trait;

use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Mlsd;

#[async_trait]
impl CommandHandler for Mlsd {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Mlsd { path } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let mut session = args.session.lock().await;
        match session.data_cmd_tx.take() {
            Some(tx) => {
                let logger = session.logger.clone();
                tokio::spawn(async move {
                    if let Err(e) = tx.send(DataChanCmd::Mlsd { path }).await {
                        slog::warn!(logger, "could not hand MLSD to the data channel"; "error" => %e);
                    }
                });
                Ok(Reply::new(ReplyCode::FileStatusOkay, "Sending machine listing"))
            }
            None => Ok(Reply::new(ReplyCode::CantOpenDataConnection, "No data connection established")),
        }
    }
}
