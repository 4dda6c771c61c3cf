//! Application bus seam and outbound payloads
//!
//! Everything the session says back to the call-flow layer goes through
//! [`BusPublisher`]: the route-win that hands the controller this session's
//! command address, the usurp broadcast that retires any predecessor,
//! per-command execution errors, and the execute-error call event for `now`
//! commands rejected while the node is down.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::command::CommandRecord;
use crate::errors::Result;
use crate::types::{CallId, FetchId, NodeId};

/// Publisher half of the bus client.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Reply to the controller that won routing: tells it where this
    /// session listens for commands.
    async fn publish_route_win(&self, controller_q: &str, payload: Map<String, Value>)
        -> Result<()>;

    /// Broadcast that this session now owns the call; prior sessions for
    /// the same call id bow out.
    async fn publish_usurp_control(
        &self,
        call_id: &CallId,
        payload: Map<String, Value>,
    ) -> Result<()>;

    /// Report a failed dialplan command back to its originator.
    async fn publish_dialplan_error(
        &self,
        call_id: &CallId,
        payload: Map<String, Value>,
    ) -> Result<()>;

    /// Emit a call event on the call's event stream.
    async fn publish_call_event(&self, call_id: &CallId, payload: Map<String, Value>)
        -> Result<()>;
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("payload builders always produce objects"),
    }
}

/// Route-win reply payload: tells the controller which session address
/// owns the call.
pub fn route_win_payload(
    call_id: &CallId,
    control_q: &str,
    control_p: &str,
    initial_ccvs: &Map<String, Value>,
) -> Map<String, Value> {
    as_map(json!({
        "Event-Category": "dialplan",
        "Event-Name": "route_win",
        "Call-ID": call_id.as_str(),
        "Control-Queue": control_q,
        "Control-PID": control_p,
        "Custom-Channel-Vars": initial_ccvs,
    }))
}

/// Usurp broadcast payload announcing this session took the call.
pub fn usurp_control_payload(
    call_id: &CallId,
    fetch_id: &FetchId,
    node: &NodeId,
) -> Map<String, Value> {
    as_map(json!({
        "Event-Category": "call_event",
        "Event-Name": "usurp_control",
        "Call-ID": call_id.as_str(),
        "Fetch-ID": fetch_id.as_str(),
        "Reason": "Route-Win",
        "Media-Node": node.as_str(),
    }))
}

/// Execution-error payload for a command that could not run.
///
/// Echoes the original command as `Request` and its `Msg-ID` so the
/// originator can correlate. Without an explicit message the text is
/// `"Could not execute dialplan action: <application_name>"`.
pub fn dialplan_error_payload(
    call_id: &CallId,
    command: &CommandRecord,
    message: Option<&str>,
) -> Map<String, Value> {
    let message = message.map(str::to_string).unwrap_or_else(|| {
        format!(
            "Could not execute dialplan action: {}",
            command.application_name
        )
    });
    as_map(json!({
        "Event-Category": "error",
        "Event-Name": "dialplan",
        "Call-ID": call_id.as_str(),
        "Msg-ID": command.msg_id.clone().unwrap_or_default(),
        "Request": Value::Object(command.raw.clone()),
        "Error-Message": message,
    }))
}

/// Call event telling the controller a `now` command was rejected because
/// the media node is unreachable.
pub fn execute_error_payload(call_id: &CallId, command: &CommandRecord) -> Map<String, Value> {
    as_map(json!({
        "Event-Category": "call_event",
        "Event-Name": "CHANNEL_EXECUTE_ERROR",
        "Call-ID": call_id.as_str(),
        "Application-Name": command.application_name.clone(),
        "Msg-ID": command.msg_id.clone().unwrap_or_default(),
        "Request": Value::Object(command.raw.clone()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(value: Value) -> CommandRecord {
        CommandRecord::from_json(value.as_object().unwrap()).unwrap()
    }

    #[test]
    fn error_payload_defaults_the_message() {
        let cmd = command(json!({"Application-Name": "bridge", "Msg-ID": "m7"}));
        let payload = dialplan_error_payload(&CallId::from("c1"), &cmd, None);
        assert_eq!(
            payload.get("Error-Message").and_then(Value::as_str),
            Some("Could not execute dialplan action: bridge"),
        );
        assert_eq!(payload.get("Msg-ID").and_then(Value::as_str), Some("m7"));
        assert_eq!(
            payload.get("Request").and_then(Value::as_object),
            Some(&cmd.raw),
        );
    }

    #[test]
    fn error_payload_keeps_an_explicit_message() {
        let cmd = command(json!({"Application-Name": "bridge"}));
        let payload =
            dialplan_error_payload(&CallId::from("c1"), &cmd, Some("Session c1 not found for bridge"));
        assert_eq!(
            payload.get("Error-Message").and_then(Value::as_str),
            Some("Session c1 not found for bridge"),
        );
    }

    #[test]
    fn route_win_carries_the_control_address() {
        let ccvs = json!({"Account-ID": "a1"}).as_object().unwrap().clone();
        let payload = route_win_payload(&CallId::from("c1"), "control-q-1", "pid-1", &ccvs);
        assert_eq!(
            payload.get("Control-Queue").and_then(Value::as_str),
            Some("control-q-1"),
        );
        assert_eq!(
            payload.get("Custom-Channel-Vars"),
            Some(&Value::Object(ccvs)),
        );
    }

    #[test]
    fn usurp_names_the_fetch_id_and_node() {
        let payload = usurp_control_payload(
            &CallId::from("c1"),
            &FetchId::from("f1"),
            &NodeId::from("fs1"),
        );
        assert_eq!(payload.get("Fetch-ID").and_then(Value::as_str), Some("f1"));
        assert_eq!(payload.get("Reason").and_then(Value::as_str), Some("Route-Win"));
        assert_eq!(payload.get("Media-Node").and_then(Value::as_str), Some("fs1"));
    }
}
