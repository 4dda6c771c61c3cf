//! Switch events and the session mailbox
//!
//! The event-producer sibling demultiplexes raw switch events by call id
//! and relays them into the owning session's mailbox as [`SwitchEvent`]s.
//! Everything else that can reach a session (dialplan payloads from the
//! bus, node status flaps, timer expirations, usurp notices) arrives as the
//! other [`SessionMsg`] variants, so the session is a plain sequential
//! actor over one channel.

use serde_json::{Map, Value};

use crate::types::{CallId, EventUuid, FetchId, NodeId};

/// Wire field naming the event.
pub const EVENT_NAME: &str = "Event-Name";
/// Wire field naming a custom event's subclass.
pub const EVENT_SUBCLASS: &str = "Event-Subclass";
/// Correlation token on execute-complete events.
pub const APPLICATION_UUID: &str = "Application-UUID";
/// Completion field checked against the in-flight `noop` msg id.
pub const APPLICATION_RESPONSE: &str = "Application-Response";
/// Digit that terminated a playback, when one did.
pub const DTMF_DIGIT: &str = "DTMF-Digit";
/// Peer leg on bridge/unbridge events.
pub const OTHER_LEG_CALL_ID: &str = "Other-Leg-Call-ID";
/// Subclass of the loopback bowout notification.
pub const LOOPBACK_BOWOUT: &str = "loopback::bowout";

/// A raw switch event relayed to the session by the event producer.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchEvent {
    /// A dialplan application finished on the switch.
    ExecuteComplete {
        application_name: Option<String>,
        application_uuid: Option<EventUuid>,
        body: Map<String, Value>,
    },
    /// The channel is gone.
    Destroy,
    /// The channel bridged to another leg.
    Bridge { other_leg: CallId },
    /// The channel unbridged from another leg.
    Unbridge { other_leg: CallId },
    /// The channel was replaced; the session whose fetch id matches takes
    /// the new id.
    Replaced {
        replaced_by: CallId,
        fetch_id: Option<FetchId>,
    },
    /// Our leg was transferred away; the matching session terminates.
    Transferee { fetch_id: Option<FetchId> },
    /// Our leg initiated a transfer and survives it.
    Transferor,
    /// The call was intercepted by another endpoint.
    Intercepted,
    /// The switch started an application outside our queue. Only
    /// `redirect` is meaningful to the session.
    Execute { application: String },
    /// The switch collapsed an internal loopback; the surviving leg is
    /// renamed.
    Bowout {
        resigning: CallId,
        acquired: CallId,
    },
}

impl SwitchEvent {
    /// Map a decoded wire event to a session-relevant [`SwitchEvent`].
    /// Events the session does not consume return `None`.
    pub fn from_json(event: &Value) -> Option<Self> {
        let body = event.as_object()?;
        let name = body.get(EVENT_NAME).and_then(Value::as_str)?;

        match name {
            "CHANNEL_EXECUTE_COMPLETE" => Some(Self::ExecuteComplete {
                application_name: field(body, crate::command::record::APPLICATION_NAME),
                application_uuid: field(body, APPLICATION_UUID).map(EventUuid),
                body: body.clone(),
            }),
            "CHANNEL_DESTROY" => Some(Self::Destroy),
            "CHANNEL_BRIDGE" => Some(Self::Bridge {
                other_leg: CallId(field(body, OTHER_LEG_CALL_ID)?),
            }),
            "CHANNEL_UNBRIDGE" => Some(Self::Unbridge {
                other_leg: CallId(field(body, OTHER_LEG_CALL_ID)?),
            }),
            "CHANNEL_REPLACED" => Some(Self::Replaced {
                replaced_by: CallId(field(body, "Replaced-By")?),
                fetch_id: field(body, "Fetch-ID").map(FetchId),
            }),
            "CHANNEL_TRANSFEREE" => Some(Self::Transferee {
                fetch_id: field(body, "Fetch-ID").map(FetchId),
            }),
            "CHANNEL_TRANSFEROR" => Some(Self::Transferor),
            "CHANNEL_INTERCEPTED" => Some(Self::Intercepted),
            "CHANNEL_EXECUTE" => Some(Self::Execute {
                application: field(body, "Application")?,
            }),
            "CUSTOM" => match body.get(EVENT_SUBCLASS).and_then(Value::as_str) {
                Some(LOOPBACK_BOWOUT) => Some(Self::Bowout {
                    resigning: CallId(field(body, "Resigning-UUID")?),
                    acquired: CallId(field(body, "Acquired-UUID")?),
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

fn field(body: &Map<String, Value>, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Binding half of the event producer.
///
/// At startup the session subscribes to the raw event stream for its
/// `(node, call id)` pair and registers interest in loopback bowout
/// notices; the producer then relays matching events into the session's
/// mailbox.
#[async_trait::async_trait]
pub trait EventStream: Send + Sync {
    async fn bind(&self, node: &NodeId, call_id: &CallId) -> crate::errors::Result<()>;

    async fn register_bowout(&self, call_id: &CallId) -> crate::errors::Result<()>;
}

/// Everything a control session can receive through its mailbox.
#[derive(Debug)]
pub enum SessionMsg {
    /// A dialplan or conference command payload from the bus.
    Dialplan(Value),
    /// A raw switch event relayed by the event producer.
    Event(SwitchEvent),
    /// A media node dropped off.
    NodeDown(NodeId),
    /// A media node came back.
    NodeUp(NodeId),
    /// Another session claimed this call.
    UsurpControl { fetch_id: FetchId },
    /// Periodic liveness probe against the channel registry.
    SanityCheck { generation: u64 },
    /// The down node did not return within the bounded window.
    NodeDownExpired { generation: u64 },
    /// Post-hangup linger is over.
    KeepAliveExpired { generation: u64 },
    /// Synchronous state probe, answered over the provided channel.
    Query(tokio::sync::oneshot::Sender<crate::session::state::SessionSnapshot>),
    /// External shutdown request.
    Stop,
}
