//! Call lifecycle transitions
//!
//! Everything that is not a command or a completion: channel destruction,
//! node flaps with bounded recovery, the periodic sanity check against the
//! channel registry, call-id renaming under replacement and loopback
//! bowout, and the transfer/usurp/redirect exits.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::driver::API_UUID_EXISTS;
use crate::events::SwitchEvent;
use crate::types::{CallId, FetchId, NodeId};

use super::actor::{ControlSession, Flow};

/// Jitter bounds for the node-recovery re-query, so a node hosting many
/// calls is not hit by every session at once.
const NODE_UP_JITTER_MS: std::ops::RangeInclusive<u64> = 100..=1500;

impl ControlSession {
    pub(crate) async fn handle_event(&mut self, event: SwitchEvent) -> Flow {
        match event {
            SwitchEvent::ExecuteComplete {
                application_name,
                application_uuid,
                body,
            } => {
                self.handle_execute_complete(application_name, application_uuid, body)
                    .await;
                Flow::Continue
            }
            SwitchEvent::Destroy => {
                self.handle_channel_destroyed().await;
                Flow::Continue
            }
            SwitchEvent::Bridge { other_leg } => {
                debug!(%other_leg, "bridged to other leg");
                self.state.other_legs.insert(other_leg);
                Flow::Continue
            }
            SwitchEvent::Unbridge { other_leg } => {
                debug!(%other_leg, "unbridged from other leg");
                self.state.other_legs.remove(&other_leg);
                Flow::Continue
            }
            SwitchEvent::Replaced {
                replaced_by,
                fetch_id,
            } => {
                self.handle_replaced(replaced_by, fetch_id);
                Flow::Continue
            }
            SwitchEvent::Transferee { fetch_id } => {
                if fetch_id.as_ref() == Some(&self.state.fetch_id) {
                    info!(call_id = %self.state.call_id, "call transferred away");
                    Flow::Stop
                } else {
                    debug!("transferee notice for another session");
                    Flow::Continue
                }
            }
            SwitchEvent::Transferor => {
                debug!(call_id = %self.state.call_id, "acting as transferor; keeping control");
                Flow::Continue
            }
            SwitchEvent::Intercepted => {
                info!(call_id = %self.state.call_id, "call intercepted; control moved");
                Flow::Stop
            }
            SwitchEvent::Execute { application } => {
                if application == "redirect" {
                    info!(call_id = %self.state.call_id, "channel redirected away");
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
            SwitchEvent::Bowout {
                resigning,
                acquired,
            } => {
                self.handle_bowout(resigning, acquired);
                Flow::Continue
            }
        }
    }

    /// The channel is gone: report the in-flight command, drain what the
    /// post-hangup rules allow, and bound the rest of the session's life
    /// with the keep-alive.
    pub(crate) async fn handle_channel_destroyed(&mut self) {
        if !self.state.is_call_up {
            // Destroy can be signalled more than once (event plus sanity
            // check); just keep the linger running.
            self.arm_keep_alive();
            return;
        }
        info!(call_id = %self.state.call_id, "channel destroyed");

        if let Some(command) = self.state.current_cmd.take() {
            self.publish_command_error(&command, None).await;
        }
        self.state.clear_in_flight();
        self.state.is_call_up = false;

        if let Some(timer) = self.state.sanity_check_tref.take() {
            timer.cancel();
        }
        self.cancel_node_down_timer();

        // Drain: post-hangup-unsafe commands error out, safe ones still run.
        self.advance().await;
        self.arm_keep_alive();
    }

    pub(crate) fn handle_node_down(&mut self, node: NodeId) {
        if node != self.state.node || !self.state.is_node_up {
            return;
        }
        warn!(node = %node, call_id = %self.state.call_id, "media node down; holding queue");
        self.state.is_node_up = false;
        self.arm_node_down_timer();
    }

    /// The node came back. After a jittered pause, ask the switch whether
    /// our channel survived the outage: resume if it did, wind down as
    /// destroyed if it did not.
    pub(crate) async fn handle_node_up(&mut self, node: NodeId) {
        if node != self.state.node || self.state.is_node_up {
            return;
        }
        self.cancel_node_down_timer();

        let pause = rand::thread_rng().gen_range(NODE_UP_JITTER_MS);
        tokio::time::sleep(Duration::from_millis(pause)).await;

        let exists = self
            .services
            .driver
            .api(&self.state.node, API_UUID_EXISTS, self.state.call_id.as_str())
            .await;
        self.state.is_node_up = true;

        match exists {
            Ok(response) if response.trim() == "true" => {
                info!(call_id = %self.state.call_id, "node restored; resuming command queue");
                self.force_advance().await;
            }
            Ok(_) => {
                info!(call_id = %self.state.call_id, "channel did not survive the node outage");
                self.handle_channel_destroyed().await;
            }
            Err(error) => {
                warn!(%error, "uuid_exists failed after node restart; treating channel as gone");
                self.handle_channel_destroyed().await;
            }
        }
    }

    pub(crate) async fn handle_node_down_expired(&mut self, generation: u64) {
        let current = self
            .state
            .node_down_tref
            .as_ref()
            .is_some_and(|timer| timer.generation() == generation);
        if !current {
            debug!("draining stale node-down expiration");
            return;
        }
        self.state.node_down_tref = None;
        warn!(
            call_id = %self.state.call_id,
            node = %self.state.node,
            "media node did not return in time"
        );
        self.handle_channel_destroyed().await;
    }

    pub(crate) async fn handle_sanity_check(&mut self, generation: u64) {
        let current = self
            .state
            .sanity_check_tref
            .as_ref()
            .is_some_and(|timer| timer.generation() == generation);
        if !current {
            debug!("draining stale sanity-check tick");
            return;
        }
        self.state.sanity_check_tref = None;

        if self.services.channels.is_live(&self.state.call_id).await {
            self.arm_sanity_check();
        } else {
            warn!(
                call_id = %self.state.call_id,
                "call no longer known to the channel registry"
            );
            self.handle_channel_destroyed().await;
        }
    }

    fn handle_replaced(&mut self, replaced_by: CallId, fetch_id: Option<FetchId>) {
        if fetch_id.as_ref() != Some(&self.state.fetch_id) {
            debug!("channel replacement for another session");
            return;
        }
        self.rename_call(replaced_by);
    }

    fn handle_bowout(&mut self, resigning: CallId, acquired: CallId) {
        if resigning != self.state.call_id || acquired == self.state.call_id {
            debug!(%resigning, %acquired, "bowout does not rename this session");
            return;
        }
        self.rename_call(acquired);
    }

    /// Take over a new call id. The registry entry moves under one write
    /// guard, so events keyed on either id during the switch still land in
    /// this mailbox rather than falling between deregister and register.
    fn rename_call(&mut self, new_id: CallId) {
        if !self.services.registry.rename(&self.state.call_id, new_id.clone()) {
            warn!(
                old = %self.state.call_id,
                new = %new_id,
                "rename found no registry entry for the old call id"
            );
        }
        info!(old = %self.state.call_id, new = %new_id, "call id renamed");
        self.state.call_id = new_id;
    }

    pub(crate) fn handle_usurp(&mut self, fetch_id: FetchId) -> Flow {
        if fetch_id == self.state.fetch_id {
            // Our own startup broadcast reflected back.
            return Flow::Continue;
        }
        info!(call_id = %self.state.call_id, "control usurped by a newer session");
        Flow::Stop
    }
}
