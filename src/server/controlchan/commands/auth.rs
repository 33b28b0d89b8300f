//! The RFC 4217 `AUTH` command: upgrades the control channel to TLS.

use async_trait::async_trait;

use crate::server::controlchan::command::AuthParam;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};
use crate::server::ControlChanMsg;

#[derive(Debug)]
pub struct Auth;

#[async_trait]
impl CommandHandler for Auth {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Auth { protocol } = args.parsed_command else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        match protocol {
            AuthParam::Tls => {
                if !args.tls_configured {
                    return Ok(Reply::new(ReplyCode::CommandNotImplemented, "TLS not configured"));
                }
                if args.session.lock().await.cmd_tls {
                    // A second AUTH on an already-secured channel.
                    return Ok(Reply::new(ReplyCode::RefusedSecurityLevel, "Control channel already secured"));
                }

                // The reply is flushed first; the loop performs the
                // handshake when it processes this message.
                if args.tx_control_chan.send(ControlChanMsg::SecureControlChannel).await.is_err() {
                    return Ok(Reply::new(ReplyCode::LocalError, "Internal error"));
                }
                Ok(Reply::new(ReplyCode::AuthOkayNoDataNeeded, "AUTH TLS OK, starting handshake"))
            }
            AuthParam::Other => Ok(Reply::new(
                ReplyCode::CommandNotImplementedForParameter,
                "Only AUTH TLS is supported",
            )),
        }
    }
}
