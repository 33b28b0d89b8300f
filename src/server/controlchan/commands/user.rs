//! The RFC 959 User Name (`USER`) command: begins the authentication.

use async_trait::async_trait;

use crate::auth::authenticator::{AuthOutcome, AuthRequest};
use crate::auth::Method;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};

#[derive(Debug)]
pub struct User;

#[async_trait]
impl CommandHandler for User {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::User { username } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let mut session = args.session.lock().await;
        if session.is_authenticated() {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Already logged in"));
        }

        session.username = Some(username.clone());

        let request = AuthRequest {
            name: username,
            ip: session.peer.ip().into(),
            family: match session.peer.ip() {
                std::net::IpAddr::V4(_) => crate::net::AddressFamily::V4,
                std::net::IpAddr::V6(_) => crate::net::AddressFamily::V6,
            },
        };

        let mut operation = args.authenticator.begin(request).await;

        // Probe with "none": accounts without credentials log straight in.
        match operation.next(vec![Method::None]).await {
            AuthOutcome::Granted(user) => {
                drop(session);
                super::pass::complete_login(&args, user).await
            }
            AuthOutcome::MethodsRemaining(_) => {
                session.auth_op = Some(operation);
                Ok(Reply::new(ReplyCode::NeedPassword, "Password required"))
            }
            AuthOutcome::Denied(_) => {
                let peer_ip = session.peer.ip().into();
                drop(session);
                args.autobanner.set_failed_login(&peer_ip);
                Ok(Reply::new(ReplyCode::NotLoggedIn, "Authentication failed"))
            }
        }
    }
}
