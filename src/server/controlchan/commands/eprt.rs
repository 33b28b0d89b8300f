//! The RFC 2428 Extended Data Port (`EPRT`) command.
//!
//! Like `PORT`, parsed and validated but not offered: active mode is out.

use async_trait::async_trait;

use crate::net::host_address::{HostAddress, HostIp, ParseFormat};
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Eprt;

#[async_trait]
impl CommandHandler for Eprt {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Eprt { addr } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        if args.session.lock().await.epsv_all {
            return Ok(Reply::new(ReplyCode::CommandSyntaxError, "EPRT is disabled after EPSV ALL"));
        }

        match HostAddress::parse(&addr, ParseFormat::EprtCmd, None) {
            None => Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Invalid EPRT argument")),
            Some(parsed) if *parsed.host() == HostIp::Unknown => Ok(Reply::new(
                ReplyCode::NetworkProtocolUnsupported,
                "Network protocol not supported, use (1,2)",
            )),
            Some(_) => Ok(Reply::new(
                ReplyCode::CommandNotImplemented,
                "Active mode not supported. Use PASV or EPSV",
            )),
        }
    }
}
