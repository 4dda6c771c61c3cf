//! Control session errors

use crate::types::CallId;

/// Control session result type
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors surfaced by the control session itself.
///
/// Failures of an individual dialplan command are not errors at this level;
/// they are reported back on the bus (`dialplan/error`) and the queue
/// advances. This enum covers the cases where the session cannot do its job
/// at all.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("malformed dialplan command: {reason}")]
    MalformedCommand { reason: String },

    #[error("no control session registered for call {call_id}")]
    SessionNotFound { call_id: CallId },

    #[error("event stream binding failed: {message}")]
    EventBinding { message: String },

    #[error("bus publish failed: {message}")]
    BusPublish { message: String },

    #[error("switch driver failure: {source}")]
    Driver {
        #[from]
        source: crate::driver::DriverError,
    },
}

impl ControlError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedCommand {
            reason: reason.into(),
        }
    }
}
