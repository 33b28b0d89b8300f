//! The RFC 2428 Extended Passive (`EPSV`) command.

use async_trait::async_trait;

use super::passive_common::setup_passive;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Epsv;

#[async_trait]
impl CommandHandler for Epsv {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Epsv { arg } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        match arg.as_deref() {
            Some(a) if a.eq_ignore_ascii_case("ALL") => {
                // From here on the client promises to use EPSV only;
                // PORT/EPRT/PASV are latched off.
                args.session.lock().await.epsv_all = true;
                Ok(Reply::new(ReplyCode::CommandOkay, "EPSV ALL OK"))
            }
            Some("1") | Some("2") | None => Ok(setup_passive(args, true).await),
            Some(_) => Ok(Reply::new(
                ReplyCode::NetworkProtocolUnsupported,
                "Network protocol not supported, use (1,2)",
            )),
        }
    }
}
