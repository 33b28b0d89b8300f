//! The authenticator service provider interface.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::net::host_address::{AddressFamily, HostIp};

use super::shared_user::SharedUser;
use super::{Error, Method, MethodKind};

/// What a caller presents when it starts authenticating a connection.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// The login name from `USER`.
    pub name: String,
    /// The peer address.
    pub ip: HostIp,
    /// The peer's address family.
    pub family: AddressFamily,
}

/// What one [`AuthOperation::next`] step produced.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Authentication completed; here is the shared user.
    Granted(SharedUser),
    /// Not there yet; these method kinds can still satisfy the account.
    MethodsRemaining(Vec<MethodKind>),
    /// Denied.
    Denied(Error),
}

/// A multi-step authentication in flight.
///
/// Callers drive the state machine by calling [`AuthOperation::next`] with
/// whatever methods they can offer, until a user is produced or an error is
/// returned. Dropping the operation cancels it.
#[async_trait]
pub trait AuthOperation: Send {
    /// The user, once granted.
    fn user(&self) -> Option<SharedUser>;

    /// The methods that could still complete this authentication.
    fn remaining_methods(&self) -> Vec<MethodKind>;

    /// The error, once denied.
    fn error(&self) -> Option<Error>;

    /// Advances the state machine with the offered methods.
    async fn next(&mut self, methods: Vec<Method>) -> AuthOutcome;

    /// Abandons the operation, releasing any held state eagerly.
    fn stop(&mut self);
}

/// An authentication backend.
#[async_trait]
pub trait Authenticator: Send + Sync + Debug {
    /// Starts an authentication for one connection.
    async fn begin(&self, request: AuthRequest) -> Box<dyn AuthOperation>;

    /// Cancels every in-flight operation. Used on shutdown and when the
    /// account database is being replaced wholesale.
    fn stop_ongoing_authentications(&self) {}
}
