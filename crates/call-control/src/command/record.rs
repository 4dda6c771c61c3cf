//! Dialplan command records
//!
//! A bus message that passes validation becomes a [`CommandRecord`] wrapped
//! in a [`Command`] variant naming where it goes: executed immediately,
//! queued at the head or tail, or flushing everything before it. The record
//! keeps the full original payload so the switch driver and error reporting
//! both see exactly what the controller sent.

use serde_json::{Map, Value};

use crate::errors::{ControlError, Result};
use crate::types::CallId;

/// Wire field carrying the application name.
pub const APPLICATION_NAME: &str = "Application-Name";
/// Wire field carrying the message id echoed back on completion.
pub const MSG_ID: &str = "Msg-ID";
/// Wire field selecting the insert position.
pub const INSERT_AT: &str = "Insert-At";
/// Wire field naming the call leg a command targets.
pub const CALL_ID: &str = "Call-ID";
/// Wire field grouping playback commands for DTMF early termination.
pub const GROUP_ID: &str = "Group-ID";
/// Wire field holding a batch's child commands.
pub const COMMANDS: &str = "Commands";
/// Wire field on a `noop` carrying filter specs for the queue.
pub const FILTER_APPLICATIONS: &str = "Filter-Applications";

/// Application name of the batch super-command.
pub const QUEUE_APP: &str = "queue";
/// Application name used for queue synchronisation points.
pub const NOOP_APP: &str = "noop";
/// Application name for media playback; the DTMF terminator contract keys
/// its group drop on this name.
pub const PLAYBACK_APP: &str = "playback";
/// Application name that terminates a call; never produces a dialplan error.
pub const HANGUP_APP: &str = "hangup";

/// Headers a batch passes down to each of its child commands. A child's own
/// value always wins.
const BATCH_DEFAULT_HEADERS: [&str; 2] = [MSG_ID, CALL_ID];

/// One validated dialplan command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    /// Logical application to run on the switch.
    pub application_name: String,
    /// Message id from the controller, echoed back on completion or error.
    pub msg_id: Option<String>,
    /// Leg this command targets; `None` or our own id means the session's
    /// call leg, otherwise one of the tracked other legs.
    pub call_id: Option<CallId>,
    /// Grouping key for cooperative DTMF termination of playback runs.
    pub group_id: Option<String>,
    /// The full original message, forwarded opaquely to the switch driver.
    pub raw: Map<String, Value>,
}

impl CommandRecord {
    /// Build a record from a decoded bus message body.
    pub fn from_json(body: &Map<String, Value>) -> Result<Self> {
        let application_name = match body.get(APPLICATION_NAME).and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(ControlError::malformed("missing Application-Name")),
        };

        Ok(Self {
            application_name,
            msg_id: string_field(body, MSG_ID),
            call_id: string_field(body, CALL_ID).map(CallId),
            group_id: string_field(body, GROUP_ID),
            raw: body.clone(),
        })
    }

    /// Whether this is the `queue` super-command holding child commands.
    pub fn is_batch(&self) -> bool {
        self.application_name == QUEUE_APP
    }

    /// Explode a batch into its child records, in payload order.
    ///
    /// Each child is merged with the batch's default headers (the child's
    /// own values win). Children that fail validation are skipped; a batch
    /// with no `Commands` array is malformed.
    pub fn explode(&self) -> Result<Vec<CommandRecord>> {
        let children = self
            .raw
            .get(COMMANDS)
            .and_then(Value::as_array)
            .ok_or_else(|| ControlError::malformed("queue command without Commands"))?;

        let mut records = Vec::with_capacity(children.len());
        for child in children {
            let Some(child) = child.as_object() else {
                tracing::warn!("skipping non-object entry in command batch");
                continue;
            };
            let mut merged = child.clone();
            for header in BATCH_DEFAULT_HEADERS {
                if !merged.contains_key(header) {
                    if let Some(default) = self.raw.get(header) {
                        merged.insert(header.to_string(), default.clone());
                    }
                }
            }
            match CommandRecord::from_json(&merged) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(%error, "skipping invalid command in batch");
                }
            }
        }
        Ok(records)
    }

    /// A string field from the raw payload.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(Value::as_str)
    }
}

fn string_field(body: &Map<String, Value>, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// A dialplan command tagged with its insert position.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute immediately, bypassing the queue.
    Now(CommandRecord),
    /// Enqueue at the front.
    Head(CommandRecord),
    /// Enqueue at the end. The default position.
    Tail(CommandRecord),
    /// Break all queued switch activity, drop the queue, then enqueue.
    Flush(CommandRecord),
}

impl Command {
    /// Validate a decoded bus message and tag it by its `Insert-At`.
    pub fn from_json(body: &Value) -> Result<Self> {
        let body = body
            .as_object()
            .ok_or_else(|| ControlError::malformed("command body is not an object"))?;
        let record = CommandRecord::from_json(body)?;

        match body.get(INSERT_AT).and_then(Value::as_str) {
            None | Some("tail") => Ok(Self::Tail(record)),
            Some("head") => Ok(Self::Head(record)),
            Some("now") => Ok(Self::Now(record)),
            Some("flush") => Ok(Self::Flush(record)),
            Some(other) => Err(ControlError::malformed(format!(
                "unknown Insert-At value {other:?}"
            ))),
        }
    }

    pub fn record(&self) -> &CommandRecord {
        match self {
            Self::Now(record) | Self::Head(record) | Self::Tail(record) | Self::Flush(record) => {
                record
            }
        }
    }
}
