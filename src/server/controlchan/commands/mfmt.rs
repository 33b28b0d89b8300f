//! The Modify Fact: Modification Time (`MFMT`) command.
//!
//! `MFMT YYYYMMDDhhmmss path` sets the modification time; a subsequent
//! `MDTM path` returns the same value, up to the filesystem's resolution.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::server::controlchan::control_loop::reply_for_storage_error;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct Mfmt;

fn parse_timestamp(ts: &str) -> Option<chrono::DateTime<Utc>> {
    let year: i32 = ts.get(0..4)?.parse().ok()?;
    let month: u32 = ts.get(4..6)?.parse().ok()?;
    let day: u32 = ts.get(6..8)?.parse().ok()?;
    let hour: u32 = ts.get(8..10)?.parse().ok()?;
    let minute: u32 = ts.get(10..12)?.parse().ok()?;
    let second: u32 = ts.get(12..14)?.parse().ok()?;
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second).single()
}

#[async_trait]
impl CommandHandler for Mfmt {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Mfmt { timestamp, file } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let engine = {
            let session = args.session.lock().await;
            session.engine.clone()
        };
        let Some(engine) = engine else {
            return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please authenticate first"));
        };

        let Some(mtime) = parse_timestamp(&timestamp) else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Invalid time value"));
        };

        match engine.set_mtime(&file, mtime).await {
            Ok(entry) => Ok(Reply::new_with_string(
                ReplyCode::FileStatus,
                format!("Modify={}; {}", entry.mtime.format("%Y%m%d%H%M%S"), entry.tvfs_name),
            )),
            Err(e) => Ok(reply_for_storage_error(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn timestamp_parses() {
        let t = parse_timestamp("20190715103000").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2019, 7, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn nonsense_timestamp_is_refused() {
        assert!(parse_timestamp("20191315103000").is_none());
        assert!(parse_timestamp("2019").is_none());
    }
}
