//! The RFC 959 Data Port (`PORT`) command.
//!
//! Active mode is not offered: the address is validated for a precise
//! reply, but no connection back to the client is made.

use async_trait::async_trait;

use crate::net::host_address::{HostAddress, ParseFormat};
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Port;

#[async_trait]
impl CommandHandler for Port {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Port { addr } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        if args.session.lock().await.epsv_all {
            return Ok(Reply::new(ReplyCode::CommandSyntaxError, "PORT is disabled after EPSV ALL"));
        }

        if HostAddress::parse(&addr, ParseFormat::PortCmd, None).is_none() {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Invalid PORT argument"));
        }

        Ok(Reply::new(
            ReplyCode::CommandNotImplemented,
            "Active mode not supported. Use PASV or EPSV",
        ))
    }
}
