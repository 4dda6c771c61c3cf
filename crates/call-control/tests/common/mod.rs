//! In-memory fakes and a harness for driving a real control session.

// Each test binary compiles this module separately and uses a different
// subset of the helpers.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use mediagate_call_control::{
    BusPublisher, CallId, ChannelRegistry, CommandRecord, ControlConfig, ControlRegistry,
    ControlSession, DriverError, EventStream, EventUuid, ExecOutcome, FetchId, NodeId, Result,
    SessionContext, SessionHandle, SessionMsg, SessionServices, SessionSnapshot, SwitchDriver,
    SwitchEvent,
};

pub const NODE: &str = "fs1";
pub const CALL_ID: &str = "call-a";
pub const FETCH_ID: &str = "fetch-1";
pub const CONTROLLER_Q: &str = "controller-q";

/// One call the session made into the switch driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Exec { record: CommandRecord, leg: CallId },
    Cast { application: String },
    Api { command: String, args: String },
}

/// Driver fake: records every call, answers `exec_cmd` from a script or,
/// when the script runs dry, with `Pending("u1")`, `Pending("u2")`, ….
pub struct ScriptedDriver {
    calls: Mutex<Vec<DriverCall>>,
    exec_script: Mutex<VecDeque<std::result::Result<ExecOutcome, DriverError>>>,
    uuid_counter: AtomicUsize,
    uuid_exists: Mutex<String>,
    equivalents: Mutex<HashMap<String, Vec<String>>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            exec_script: Mutex::new(VecDeque::new()),
            uuid_counter: AtomicUsize::new(1),
            uuid_exists: Mutex::new("true".to_string()),
            equivalents: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an explicit outcome for the next `exec_cmd`.
    pub fn push_exec_result(&self, result: std::result::Result<ExecOutcome, DriverError>) {
        self.exec_script.lock().push_back(result);
    }

    pub fn set_uuid_exists(&self, response: &str) {
        *self.uuid_exists.lock() = response.to_string();
    }

    pub fn set_equivalents(&self, application: &str, names: &[&str]) {
        self.equivalents.lock().insert(
            application.to_string(),
            names.iter().map(|name| name.to_string()).collect(),
        );
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn exec_calls(&self) -> Vec<(String, CallId)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Exec { record, leg } => {
                    Some((record.application_name.clone(), leg.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn exec_records(&self) -> Vec<CommandRecord> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Exec { record, .. } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn api_calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Api { command, args } => Some((command.clone(), args.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn cast_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Cast { application } => Some(application.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SwitchDriver for ScriptedDriver {
    async fn exec_cmd(
        &self,
        _node: &NodeId,
        call_leg: &CallId,
        command: &CommandRecord,
        _reply_to: &str,
    ) -> std::result::Result<ExecOutcome, DriverError> {
        self.calls.lock().push(DriverCall::Exec {
            record: command.clone(),
            leg: call_leg.clone(),
        });
        if let Some(result) = self.exec_script.lock().pop_front() {
            return result;
        }
        let n = self.uuid_counter.fetch_add(1, Ordering::SeqCst);
        Ok(ExecOutcome::Pending(EventUuid::new(format!("u{n}"))))
    }

    async fn cast_cmd(
        &self,
        _node: &NodeId,
        _call_id: &CallId,
        application: &str,
        _args: &Value,
    ) -> std::result::Result<(), DriverError> {
        self.calls.lock().push(DriverCall::Cast {
            application: application.to_string(),
        });
        Ok(())
    }

    async fn api(
        &self,
        _node: &NodeId,
        command: &str,
        args: &str,
    ) -> std::result::Result<String, DriverError> {
        self.calls.lock().push(DriverCall::Api {
            command: command.to_string(),
            args: args.to_string(),
        });
        match command {
            "uuid_exists" => Ok(self.uuid_exists.lock().clone()),
            _ => Ok("+OK".to_string()),
        }
    }

    fn switch_application_names(&self, application_name: &str) -> Vec<String> {
        self.equivalents
            .lock()
            .get(application_name)
            .cloned()
            .unwrap_or_else(|| vec![application_name.to_string()])
    }
}

/// Everything the session said on the bus, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    RouteWin { target: String, payload: Map<String, Value> },
    Usurp { payload: Map<String, Value> },
    DialplanError { payload: Map<String, Value> },
    CallEvent { payload: Map<String, Value> },
}

#[derive(Default)]
pub struct RecordingBus {
    messages: Mutex<Vec<BusMessage>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<BusMessage> {
        self.messages.lock().clone()
    }

    pub fn route_wins(&self) -> Vec<(String, Map<String, Value>)> {
        self.messages
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                BusMessage::RouteWin { target, payload } => {
                    Some((target.clone(), payload.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn usurps(&self) -> Vec<Map<String, Value>> {
        self.messages
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                BusMessage::Usurp { payload } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn dialplan_errors(&self) -> Vec<Map<String, Value>> {
        self.messages
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                BusMessage::DialplanError { payload } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Application names the published errors were about, in order.
    pub fn errored_applications(&self) -> Vec<String> {
        self.dialplan_errors()
            .iter()
            .filter_map(|payload| {
                payload
                    .get("Request")
                    .and_then(Value::as_object)
                    .and_then(|request| request.get("Application-Name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }

    pub fn call_events(&self) -> Vec<Map<String, Value>> {
        self.messages
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                BusMessage::CallEvent { payload } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl BusPublisher for RecordingBus {
    async fn publish_route_win(
        &self,
        controller_q: &str,
        payload: Map<String, Value>,
    ) -> Result<()> {
        self.messages.lock().push(BusMessage::RouteWin {
            target: controller_q.to_string(),
            payload,
        });
        Ok(())
    }

    async fn publish_usurp_control(
        &self,
        _call_id: &CallId,
        payload: Map<String, Value>,
    ) -> Result<()> {
        self.messages.lock().push(BusMessage::Usurp { payload });
        Ok(())
    }

    async fn publish_dialplan_error(
        &self,
        _call_id: &CallId,
        payload: Map<String, Value>,
    ) -> Result<()> {
        self.messages
            .lock()
            .push(BusMessage::DialplanError { payload });
        Ok(())
    }

    async fn publish_call_event(
        &self,
        _call_id: &CallId,
        payload: Map<String, Value>,
    ) -> Result<()> {
        self.messages.lock().push(BusMessage::CallEvent { payload });
        Ok(())
    }
}

/// Channel registry fake with a switchable liveness answer.
pub struct FakeChannels {
    live: AtomicBool,
}

impl FakeChannels {
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
        }
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelRegistry for FakeChannels {
    async fn is_live(&self, _call_id: &CallId) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Event-stream fake recording bindings.
#[derive(Default)]
pub struct FakeEvents {
    binds: Mutex<Vec<(NodeId, CallId)>>,
    bowout_registrations: Mutex<Vec<CallId>>,
}

impl FakeEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binds(&self) -> Vec<(NodeId, CallId)> {
        self.binds.lock().clone()
    }

    pub fn bowout_registrations(&self) -> Vec<CallId> {
        self.bowout_registrations.lock().clone()
    }
}

#[async_trait]
impl EventStream for FakeEvents {
    async fn bind(&self, node: &NodeId, call_id: &CallId) -> Result<()> {
        self.binds.lock().push((node.clone(), call_id.clone()));
        Ok(())
    }

    async fn register_bowout(&self, call_id: &CallId) -> Result<()> {
        self.bowout_registrations.lock().push(call_id.clone());
        Ok(())
    }
}

/// A live session plus handles on all its fakes.
pub struct Harness {
    pub driver: Arc<ScriptedDriver>,
    pub bus: Arc<RecordingBus>,
    pub channels: Arc<FakeChannels>,
    pub events: Arc<FakeEvents>,
    pub registry: Arc<ControlRegistry>,
    pub handle: SessionHandle,
}

/// Route test logging through tracing, once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    pub fn spawn(config: ControlConfig) -> Self {
        init_tracing();
        let driver = Arc::new(ScriptedDriver::new());
        let bus = Arc::new(RecordingBus::new());
        let channels = Arc::new(FakeChannels::new());
        let events = Arc::new(FakeEvents::new());
        let registry = Arc::new(ControlRegistry::new());

        let context = SessionContext {
            node: NodeId::from(NODE),
            call_id: CallId::from(CALL_ID),
            fetch_id: FetchId::from(FETCH_ID),
            controller_q: CONTROLLER_Q.to_string(),
            controller_p: "controller-pid".to_string(),
            initial_ccvs: json!({"Account-ID": "acct-1"})
                .as_object()
                .unwrap()
                .clone(),
        };
        let services = SessionServices {
            driver: driver.clone(),
            bus: bus.clone(),
            channels: channels.clone(),
            events: events.clone(),
            registry: registry.clone(),
        };
        let handle = ControlSession::spawn(context, config, services);

        Self {
            driver,
            bus,
            channels,
            events,
            registry,
            handle,
        }
    }

    pub fn dialplan(&self, payload: Value) {
        assert!(self.handle.send(SessionMsg::Dialplan(payload)));
    }

    pub fn event(&self, event: SwitchEvent) {
        assert!(self.handle.send(SessionMsg::Event(event)));
    }

    /// Deliver an execute-complete with the given extra body fields.
    pub fn complete(&self, application: &str, event_uuid: &str, extra: Value) {
        let mut body = extra.as_object().cloned().unwrap_or_default();
        body.insert("Event-Name".into(), json!("CHANNEL_EXECUTE_COMPLETE"));
        body.insert("Application-Name".into(), json!(application));
        body.insert("Application-UUID".into(), json!(event_uuid));
        let event = SwitchEvent::from_json(&Value::Object(body)).expect("well-formed completion");
        self.event(event);
    }

    /// Snapshot the session state. Because the mailbox is processed in
    /// order, this also waits out everything sent before it.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.handle.snapshot().await.expect("session alive")
    }
}

/// Poll until `cond` holds or a few seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within four seconds");
}

/// A tail playback command payload.
pub fn playback(msg_id: &str, group: Option<&str>) -> Value {
    let mut payload = json!({
        "Application-Name": "playback",
        "Msg-ID": msg_id,
        "File": format!("{msg_id}.wav"),
    });
    if let Some(group) = group {
        payload["Group-ID"] = json!(group);
    }
    payload
}
