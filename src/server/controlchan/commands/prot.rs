//! The RFC 4217 Data Channel Protection Level (`PROT`) command.

use async_trait::async_trait;

use crate::server::controlchan::command::ProtParam;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Prot;

#[async_trait]
impl CommandHandler for Prot {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Prot { param } = args.parsed_command else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let mut session = args.session.lock().await;

        // Whatever the requested level, PROT means nothing until the control
        // channel itself is secured.
        if !session.cmd_tls {
            return Ok(Reply::new(ReplyCode::CommandNotImplemented, "Secure the control channel first"));
        }

        match param {
            ProtParam::Private => {
                if !session.pbsz_done {
                    return Ok(Reply::new(ReplyCode::BadCommandSequence, "PBSZ must precede PROT"));
                }
                session.data_tls = true;
                Ok(Reply::new(ReplyCode::CommandOkay, "PROT P OK. Data channel will be secured"))
            }
            // Downgrading data below the control channel's level is refused.
            ProtParam::Clear => Ok(Reply::new(ReplyCode::RefusedSecurityLevel, "PROT C refused on a secured session")),
            ProtParam::Safe | ProtParam::Confidential => Ok(Reply::new(
                ReplyCode::ProtectionLevelUnsupported,
                "Only PROT C and PROT P are supported",
            )),
        }
    }
}
