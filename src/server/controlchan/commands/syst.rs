//! The RFC 959 `SYST` command.
//
// This response is kind of like the User-Agent in http: very much mis-used to
// gauge the capabilities of the other peer. D.J. Bernstein recommends to
// just respond with `215 UNIX Type: L8` for greatest compatibility.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Syst;

#[async_trait]
impl CommandHandler for Syst {
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::SystemType, "UNIX Type: L8"))
    }
}
