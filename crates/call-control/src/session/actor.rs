//! The control session actor
//!
//! One task per live call, looping over a single mailbox. Everything that
//! can happen to the call (dialplan commands, switch events, node flaps,
//! timer expirations, usurp notices) arrives as a [`SessionMsg`], so the
//! handlers in the sibling modules run strictly one at a time and the
//! session state needs no locking.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::{
    dialplan_error_payload, route_win_payload, usurp_control_payload, BusPublisher,
};
use crate::command::record::HANGUP_APP;
use crate::command::CommandRecord;
use crate::config::ControlConfig;
use crate::driver::SwitchDriver;
use crate::errors::Result;
use crate::events::{EventStream, SessionMsg};
use crate::registry::{ChannelRegistry, ControlRegistry, SessionHandle};
use crate::types::{CallId, FetchId, NodeId};

use super::state::{SessionState, TimerRef};

/// What routing hands the gateway when it spawns a session for a call.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub node: NodeId,
    pub call_id: CallId,
    pub fetch_id: FetchId,
    /// Bus address of the controller that won routing.
    pub controller_q: String,
    /// Process token of that controller.
    pub controller_p: String,
    /// Channel variables from routing, echoed back in the route-win.
    pub initial_ccvs: serde_json::Map<String, serde_json::Value>,
}

/// The process-wide services a session talks to.
#[derive(Clone)]
pub struct SessionServices {
    pub driver: Arc<dyn SwitchDriver>,
    pub bus: Arc<dyn BusPublisher>,
    pub channels: Arc<dyn ChannelRegistry>,
    pub events: Arc<dyn EventStream>,
    pub registry: Arc<ControlRegistry>,
}

/// Whether the mailbox loop keeps running after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// The per-call control session actor.
pub struct ControlSession {
    pub(crate) state: SessionState,
    pub(crate) config: ControlConfig,
    pub(crate) services: SessionServices,
    mailbox: mpsc::UnboundedReceiver<SessionMsg>,
    self_tx: mpsc::UnboundedSender<SessionMsg>,
}

impl ControlSession {
    /// Spawn the session task for a freshly routed call and register its
    /// mailbox under the call id.
    pub fn spawn(
        context: SessionContext,
        config: ControlConfig,
        services: SessionServices,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(tx.clone());
        services
            .registry
            .register(context.call_id.clone(), handle.clone());

        let state = SessionState::new(
            context.node,
            context.call_id,
            context.fetch_id,
            context.controller_q,
            context.controller_p,
            context.initial_ccvs,
        );
        let session = Self {
            state,
            config,
            services,
            mailbox: rx,
            self_tx: tx,
        };
        tokio::spawn(session.run());
        handle
    }

    async fn run(mut self) {
        if let Err(error) = self.startup().await {
            error!(call_id = %self.state.call_id, %error, "control session startup failed");
            self.teardown();
            return;
        }
        info!(
            call_id = %self.state.call_id,
            node = %self.state.node,
            control_q = %self.state.control_q,
            "control session started"
        );

        while let Some(msg) = self.mailbox.recv().await {
            if self.handle(msg).await == Flow::Stop {
                break;
            }
        }
        self.teardown();
    }

    /// Session startup, in the required order: bind the event stream,
    /// register for bowout notices, start the sanity check, stamp the
    /// channel with our bus address, answer the controller, and retire any
    /// predecessor session.
    async fn startup(&mut self) -> Result<()> {
        let node = self.state.node.clone();
        let call_id = self.state.call_id.clone();

        self.services.events.bind(&node, &call_id).await?;
        self.services.events.register_bowout(&call_id).await?;
        self.arm_sanity_check();

        let stamp = json!({
            "Control-Queue": self.state.control_q,
            "Control-Node": node.as_str(),
            "Fetch-ID": self.state.fetch_id.as_str(),
        });
        if let Err(error) = self
            .services
            .driver
            .cast_cmd(&node, &call_id, "multiset", &stamp)
            .await
        {
            warn!(%error, "failed to stamp channel with the control address");
        }

        let route_win = route_win_payload(
            &call_id,
            &self.state.control_q,
            &self.state.control_p,
            &self.state.initial_ccvs,
        );
        if let Err(error) = self
            .services
            .bus
            .publish_route_win(&self.state.controller_q, route_win)
            .await
        {
            warn!(%error, "failed to publish route win");
        }

        let usurp = usurp_control_payload(&call_id, &self.state.fetch_id, &node);
        if let Err(error) = self
            .services
            .bus
            .publish_usurp_control(&call_id, usurp)
            .await
        {
            warn!(%error, "failed to broadcast usurp control");
        }
        Ok(())
    }

    async fn handle(&mut self, msg: SessionMsg) -> Flow {
        match msg {
            SessionMsg::Dialplan(payload) => {
                self.handle_dialplan(payload).await;
                Flow::Continue
            }
            SessionMsg::Event(event) => self.handle_event(event).await,
            SessionMsg::NodeDown(node) => {
                self.handle_node_down(node);
                Flow::Continue
            }
            SessionMsg::NodeUp(node) => {
                self.handle_node_up(node).await;
                Flow::Continue
            }
            SessionMsg::UsurpControl { fetch_id } => self.handle_usurp(fetch_id),
            SessionMsg::SanityCheck { generation } => {
                self.handle_sanity_check(generation).await;
                Flow::Continue
            }
            SessionMsg::NodeDownExpired { generation } => {
                self.handle_node_down_expired(generation).await;
                Flow::Continue
            }
            SessionMsg::KeepAliveExpired { generation } => self.handle_keep_alive(generation),
            SessionMsg::Query(reply) => {
                let _ = reply.send(self.state.snapshot());
                Flow::Continue
            }
            SessionMsg::Stop => {
                info!(call_id = %self.state.call_id, "control session stopped externally");
                Flow::Stop
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(timer) = self.state.sanity_check_tref.take() {
            timer.cancel();
        }
        if let Some(timer) = self.state.node_down_tref.take() {
            timer.cancel();
        }
        if let Some(timer) = self.state.keep_alive_ref.take() {
            timer.cancel();
        }
        self.services.registry.deregister(&self.state.call_id);
        info!(
            call_id = %self.state.call_id,
            duration_ms = self.state.start_time.elapsed().as_millis() as u64,
            "control session ended"
        );
    }

    // ---- timers ------------------------------------------------------

    pub(crate) fn arm_sanity_check(&mut self) {
        if let Some(timer) = self.state.sanity_check_tref.take() {
            timer.cancel();
        }
        let generation = self.state.next_timer_generation();
        let period = self.config.sanity_check_period;
        let tx = self.self_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(period).await;
            let _ = tx.send(SessionMsg::SanityCheck { generation });
        });
        self.state.sanity_check_tref = Some(TimerRef::new(generation, task));
    }

    pub(crate) fn arm_node_down_timer(&mut self) {
        if let Some(timer) = self.state.node_down_tref.take() {
            timer.cancel();
        }
        let generation = self.state.next_timer_generation();
        let wait = self.config.node_down_max_wait;
        let tx = self.self_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = tx.send(SessionMsg::NodeDownExpired { generation });
        });
        self.state.node_down_tref = Some(TimerRef::new(generation, task));
    }

    pub(crate) fn cancel_node_down_timer(&mut self) {
        if let Some(timer) = self.state.node_down_tref.take() {
            timer.cancel();
        }
    }

    /// Arm (or rearm) the post-hangup keep-alive. The generation bump makes
    /// an expiration message from a cancelled timer stale before it is
    /// read, so a late command cannot be cut short by the old deadline.
    pub(crate) fn arm_keep_alive(&mut self) {
        if let Some(timer) = self.state.keep_alive_ref.take() {
            timer.cancel();
        }
        let generation = self.state.next_timer_generation();
        let linger = self.config.post_hangup_keep_alive;
        let tx = self.self_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            let _ = tx.send(SessionMsg::KeepAliveExpired { generation });
        });
        self.state.keep_alive_ref = Some(TimerRef::new(generation, task));
    }

    fn handle_keep_alive(&mut self, generation: u64) -> Flow {
        let current = self
            .state
            .keep_alive_ref
            .as_ref()
            .is_some_and(|timer| timer.generation() == generation);
        if !current {
            debug!("draining stale keep-alive expiration");
            return Flow::Continue;
        }
        info!(call_id = %self.state.call_id, "post-hangup keep-alive expired");
        Flow::Stop
    }

    // ---- shared reporting --------------------------------------------

    /// Report a failed command back on the bus. A `hangup` is a terminal
    /// no-op at worst and never produces an error.
    pub(crate) async fn publish_command_error(
        &self,
        command: &CommandRecord,
        message: Option<&str>,
    ) {
        if command.application_name == HANGUP_APP {
            debug!("suppressing execution error for hangup");
            return;
        }
        let payload = dialplan_error_payload(&self.state.call_id, command, message);
        if let Err(error) = self
            .services
            .bus
            .publish_dialplan_error(&self.state.call_id, payload)
            .await
        {
            warn!(%error, "failed to publish dialplan error");
        }
    }
}
