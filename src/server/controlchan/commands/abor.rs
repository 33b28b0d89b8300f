//! The RFC 959 Abort (`ABOR`) command.
//!
//! `ABOR` is the one command that overtakes a running transfer: it aborts
//! the data-channel task (which answers 426 for the transfer) and is
//! acknowledged with 226.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Abor;

#[async_trait]
impl CommandHandler for Abor {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let mut session = args.session.lock().await;
        if session.data_cmd_tx.is_some() || session.data_abort_tx.is_some() {
            session.close_data_channel();
            Ok(Reply::new(ReplyCode::ClosingDataConnection, "Transfer aborted"))
        } else {
            Ok(Reply::new(ReplyCode::ClosingDataConnection, "No transfer to abort"))
        }
    }
}
