//! The RFC 2389 Options (`OPTS`) command: `UTF8` and `MLST` negotiation.

use async_trait::async_trait;

use crate::server::controlchan::command::Opt;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};
use crate::server::session::DEFAULT_MLST_FACTS;

#[derive(Debug)]
pub struct Opts;

#[async_trait]
impl CommandHandler for Opts {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Opts { option } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        match option {
            Opt::Utf8 { on: true } => Ok(Reply::new(ReplyCode::CommandOkay, "Always in UTF-8 mode")),
            // Turning UTF-8 off is not something we do.
            Opt::Utf8 { on: false } => Ok(Reply::new(
                ReplyCode::CommandNotImplementedForParameter,
                "UTF-8 cannot be disabled",
            )),
            Opt::MlstFacts { facts } => {
                let enabled: Vec<String> = facts
                    .into_iter()
                    .filter(|f| DEFAULT_MLST_FACTS.contains(&f.as_str()))
                    .collect();

                let mut session = args.session.lock().await;
                session.mlst_facts = enabled.clone();

                let mut listing = String::new();
                for fact in &enabled {
                    listing.push_str(fact);
                    listing.push(';');
                }
                Ok(Reply::new_with_string(ReplyCode::CommandOkay, format!("MLST OPTS {}", listing)))
            }
        }
    }
}
