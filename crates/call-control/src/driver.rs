//! Switch driver seam
//!
//! The session never talks the switch wire protocol itself; it hands
//! logical commands to a [`SwitchDriver`] and waits (or not) for the
//! correlation token to come back through the event stream. Production
//! wires this to the real switch connection; tests substitute a recording
//! fake.

use async_trait::async_trait;
use serde_json::Value;

use crate::command::CommandRecord;
use crate::types::{CallId, EventUuid, NodeId};

/// Switch `api` command that asks whether a channel still exists.
pub const API_UUID_EXISTS: &str = "uuid_exists";
/// Switch `api` command that breaks all queued activity on a channel.
pub const API_UUID_BREAK: &str = "uuid_break";

/// How the switch accepted a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Fire-and-forget; the switch will not emit a completion for it.
    Fired,
    /// The switch will emit an execute-complete carrying this token when
    /// the application finishes.
    Pending(EventUuid),
}

/// Failures raised by the driver when launching a command.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    /// The switch has no session for the call leg.
    #[error("no session on the switch for {call_id}")]
    SessionNotFound { call_id: CallId },

    /// The switch refused the command.
    #[error("command rejected: {reason}")]
    Rejected { reason: String },

    /// The node connection failed mid-call.
    #[error("switch transport failure: {message}")]
    Transport { message: String },
}

/// Interface to the media switch.
#[async_trait]
pub trait SwitchDriver: Send + Sync {
    /// Dispatch one dialplan command on a call leg. `reply_to` is the bus
    /// address events about this command should be steered to.
    async fn exec_cmd(
        &self,
        node: &NodeId,
        call_leg: &CallId,
        command: &CommandRecord,
        reply_to: &str,
    ) -> Result<ExecOutcome, DriverError>;

    /// Fire a synthetic command at a channel without waiting for any
    /// acknowledgement. Used at session start to stamp the channel with
    /// the session's bus address.
    async fn cast_cmd(
        &self,
        node: &NodeId,
        call_id: &CallId,
        application: &str,
        args: &Value,
    ) -> Result<(), DriverError>;

    /// Run a switch api query and return its raw textual response.
    async fn api(&self, node: &NodeId, command: &str, args: &str) -> Result<String, DriverError>;

    /// Name equivalence: the switch-level application names one logical
    /// command can surface as. One logical command may run several switch
    /// apps, so its completion can arrive under any of these names.
    fn switch_application_names(&self, application_name: &str) -> Vec<String> {
        vec![application_name.to_string()]
    }
}
