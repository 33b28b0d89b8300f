//! The event type the per-connection control loop consumes.

use super::command::Command;
use crate::server::ControlChanMsg;

/// One unit of work for the control loop: either a command from the client
/// or an internal message, typically from the data channel task.
#[derive(Debug)]
pub enum Event {
    /// A command from the client (e.g. `USER` or `PASV`).
    Command(Command),
    /// A message originating from within the server.
    InternalMsg(ControlChanMsg),
}
