//! Per-call session state
//!
//! The single datum behind one control session. Created when routing
//! selects this gateway for a call, mutated only from the session's own
//! mailbox loop, destroyed when the post-hangup keep-alive expires or an
//! external usurp arrives.

use std::collections::HashSet;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::command::{CommandQueue, CommandRecord};
use crate::types::{CallId, EventUuid, FetchId, NodeId};

/// Handle to one armed timer task.
///
/// Every armed timer carries a generation; the expiration message posts the
/// generation back, and a handler only honours it when it matches the
/// currently stored ref. Rearming replaces the ref (and aborts the old
/// task), so an expiration already sitting in the mailbox goes stale
/// instead of firing the old deadline.
#[derive(Debug)]
pub struct TimerRef {
    generation: u64,
    task: JoinHandle<()>,
}

impl TimerRef {
    pub fn new(generation: u64, task: JoinHandle<()>) -> Self {
        Self { generation, task }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

/// Everything the control session knows about its call.
#[derive(Debug)]
pub struct SessionState {
    /// Media switch node hosting the call.
    pub node: NodeId,
    /// Current call identifier. Renamed under replacement and bowout.
    pub call_id: CallId,
    /// Identifier of the routing decision that created this session.
    pub fetch_id: FetchId,
    /// Pending dialplan commands.
    pub command_q: CommandQueue,
    /// Application currently executing on the switch, when one is.
    pub current_app: Option<String>,
    /// Full record of the in-flight command, kept for error reporting.
    pub current_cmd: Option<CommandRecord>,
    /// Correlation token the switch returned for the in-flight command.
    pub current_cmd_uuid: Option<EventUuid>,
    /// Msg-ID of the in-flight command, echoed back to the originator.
    pub msg_id: Option<String>,
    /// Other legs of this call, for commands that target a specific leg.
    pub other_legs: HashSet<CallId>,
    /// Whether the channel is still alive on the switch.
    pub is_call_up: bool,
    /// Whether the switch node is reachable.
    pub is_node_up: bool,
    /// Armed node-outage deadline, while the node is down.
    pub node_down_tref: Option<TimerRef>,
    /// Armed post-hangup keep-alive, after the channel died.
    pub keep_alive_ref: Option<TimerRef>,
    /// Armed periodic sanity check.
    pub sanity_check_tref: Option<TimerRef>,
    /// Bus address of the upstream controller (route-win target).
    pub controller_q: String,
    /// Process token of the upstream controller.
    pub controller_p: String,
    /// Bus address at which this session receives commands.
    pub control_q: String,
    /// Process token identifying this session, published alongside
    /// `control_q` in the route-win.
    pub control_p: String,
    /// Channel variables handed over by routing, echoed in the route-win.
    pub initial_ccvs: Map<String, Value>,
    /// When the session started, for duration logging.
    pub start_time: Instant,

    timer_generation: u64,
}

impl SessionState {
    pub fn new(
        node: NodeId,
        call_id: CallId,
        fetch_id: FetchId,
        controller_q: String,
        controller_p: String,
        initial_ccvs: Map<String, Value>,
    ) -> Self {
        let control_q = format!("call-control.{}", Uuid::new_v4());
        let control_p = Uuid::new_v4().to_string();
        Self {
            node,
            call_id,
            fetch_id,
            command_q: CommandQueue::new(),
            current_app: None,
            current_cmd: None,
            current_cmd_uuid: None,
            msg_id: None,
            other_legs: HashSet::new(),
            is_call_up: true,
            is_node_up: true,
            node_down_tref: None,
            keep_alive_ref: None,
            sanity_check_tref: None,
            controller_q,
            controller_p,
            control_q,
            control_p,
            initial_ccvs,
            start_time: Instant::now(),
            timer_generation: 0,
        }
    }

    /// Whether a command is awaiting its execute-complete.
    pub fn has_command_in_flight(&self) -> bool {
        self.current_app.is_some()
    }

    /// Forget the in-flight command without touching the queue.
    pub fn clear_in_flight(&mut self) {
        self.current_app = None;
        self.current_cmd = None;
        self.current_cmd_uuid = None;
        self.msg_id = None;
    }

    /// Record a dispatched command awaiting completion.
    pub fn set_in_flight(&mut self, command: CommandRecord, event_uuid: EventUuid) {
        self.current_app = Some(command.application_name.clone());
        self.msg_id = command.msg_id.clone();
        self.current_cmd_uuid = Some(event_uuid);
        self.current_cmd = Some(command);
    }

    /// Next timer generation. Monotonic per session.
    pub fn next_timer_generation(&mut self) -> u64 {
        self.timer_generation += 1;
        self.timer_generation
    }

    /// Which leg a command executes against: a named other leg when we
    /// track it, our own leg otherwise.
    pub fn target_leg(&self, command: &CommandRecord) -> CallId {
        match &command.call_id {
            Some(leg) if *leg != self.call_id && self.other_legs.contains(leg) => leg.clone(),
            _ => self.call_id.clone(),
        }
    }
}

/// Point-in-time view of a session, answered to [`SessionMsg::Query`].
///
/// [`SessionMsg::Query`]: crate::events::SessionMsg::Query
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub call_id: CallId,
    pub node: NodeId,
    pub is_call_up: bool,
    pub is_node_up: bool,
    pub current_app: Option<String>,
    pub queued_applications: Vec<String>,
    pub other_legs: Vec<CallId>,
}

impl SessionState {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            call_id: self.call_id.clone(),
            node: self.node.clone(),
            is_call_up: self.is_call_up,
            is_node_up: self.is_node_up,
            current_app: self.current_app.clone(),
            queued_applications: self
                .command_q
                .application_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            other_legs: self.other_legs.iter().cloned().collect(),
        }
    }
}
