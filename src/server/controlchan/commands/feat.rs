//! The RFC 2389 Feature (`FEAT`) command.

use async_trait::async_trait;

use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Feat;

#[async_trait]
impl CommandHandler for Feat {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let mut lines: Vec<String> = vec!["Extensions supported:".to_string()];

        if args.tls_configured {
            lines.push("AUTH TLS".to_string());
            lines.push("PBSZ".to_string());
            lines.push("PROT".to_string());
        }
        for feature in [
            "EPSV",
            "EPRT",
            "MDTM",
            "MFMT",
            "MLST type*;size*;modify*;perm*;UNIX.mode*;",
            "SIZE",
            "REST STREAM",
            "MODE Z",
            "TVFS",
            "UTF8",
        ] {
            lines.push(feature.to_string());
        }
        lines.push("END".to_string());

        Ok(Reply::new_multiline(ReplyCode::SystemStatus, lines))
    }
}
