//! The RFC 4217 Protection Buffer Size (`PBSZ`) command.
//!
//! For TLS the buffer size is meaningless but the command is compulsory
//! before `PROT`; only `PBSZ 0` is acceptable.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Pbsz;

#[async_trait]
impl CommandHandler for Pbsz {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Pbsz { size } = args.parsed_command else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let mut session = args.session.lock().await;
        if !session.cmd_tls {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Secure the control channel first"));
        }
        if size != 0 {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Only PBSZ=0 is acceptable"));
        }
        session.pbsz_done = true;
        Ok(Reply::new(ReplyCode::CommandOkay, "PBSZ=0"))
    }
}
