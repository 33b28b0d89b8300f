//! The RFC 959 Password (`PASS`) command: concludes the authentication.

use std::time::Duration;

use async_trait::async_trait;

use crate::auth::authenticator::AuthOutcome;
use crate::auth::{Error as AuthError, Method, SharedUser};
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, ControlChanError, Reply, ReplyCode};
use crate::tvfs::Engine;

const TVFS_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Pass;

/// Finishes a successful authentication: installs the shared user, builds
/// the per-user TVFS engine, and rewires the rate limiters.
pub(super) async fn complete_login(args: &CommandContext, user: SharedUser) -> Result<Reply, ControlChanError> {
    let mut session = args.session.lock().await;

    let engine = Engine::new(session.logger.clone(), user.mount_tree(), user.backend(), TVFS_SYNC_TIMEOUT);
    session.engine = Some(engine);
    session.user = Some(user.clone());
    session.auth_op = None;
    session.pre_login_failures = 0;
    session.update_shared_limits();

    slog::info!(session.logger, "user logged in"; "user" => user.name().unwrap_or_default());

    Ok(Reply::new(ReplyCode::UserLoggedIn, "User logged in, proceed"))
}

#[async_trait]
impl CommandHandler for Pass {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let Command::Pass { password } = args.parsed_command.clone() else {
            return Err(ControlChanError::new(crate::server::ControlChanErrorKind::IllegalState));
        };

        let mut session = args.session.lock().await;
        if session.is_authenticated() {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Already logged in"));
        }

        let Some(mut operation) = session.auth_op.take() else {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Login with USER first"));
        };
        let peer_ip: crate::net::HostIp = session.peer.ip().into();
        drop(session);

        // The throttler may hold this call back; the control channel stays
        // suspended for the duration, which is the point.
        match operation.next(vec![Method::Password(password.as_str().to_string())]).await {
            AuthOutcome::Granted(user) => complete_login(&args, user).await,
            AuthOutcome::Denied(error) => {
                args.autobanner.set_failed_login(&peer_ip);
                slog::info!(args.logger, "authentication failed"; "error" => %error);
                let text = match error {
                    AuthError::Internal => "Internal error during login",
                    _ => "Authentication failed",
                };
                Ok(Reply::new(ReplyCode::NotLoggedIn, text))
            }
            AuthOutcome::MethodsRemaining(_) => {
                // A password was offered and neither granted nor denied; the
                // account must want something we cannot provide.
                args.autobanner.set_failed_login(&peer_ip);
                Ok(Reply::new(ReplyCode::NotLoggedIn, "Authentication failed"))
            }
        }
    }
}
