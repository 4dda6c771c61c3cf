//! The dispatch / advance engine
//!
//! `advance` is the single progress function: it pulls the next queued
//! command, launches it on the switch, and either records it as in flight
//! (when a completion is expected) or keeps pulling. Every failure path
//! reports the command on the bus and keeps the queue moving; the session
//! never retries a command itself.

use tracing::{debug, error};

use crate::command::CommandRecord;
use crate::driver::{DriverError, ExecOutcome};
use crate::types::CallId;

use super::actor::ControlSession;

impl ControlSession {
    /// Dispatch the next command when the session is idle and able.
    pub(crate) async fn maybe_advance(&mut self) {
        if self.state.is_node_up
            && !self.state.command_q.is_empty()
            && !self.state.has_command_in_flight()
        {
            self.advance().await;
        }
    }

    /// Drop whatever was in flight and move on. Used when a completion can
    /// no longer arrive: flushes, node recovery, rejected commands.
    pub(crate) async fn force_advance(&mut self) {
        self.state.clear_in_flight();
        self.advance().await;
    }

    /// Pull and launch commands until one is in flight, the queue runs
    /// dry, or the node is unreachable.
    pub(crate) async fn advance(&mut self) {
        loop {
            if !self.state.is_node_up {
                self.state.clear_in_flight();
                return;
            }
            let Some(command) = self.state.command_q.pop() else {
                self.state.clear_in_flight();
                return;
            };

            if !self.state.is_call_up
                && !self.config.is_post_hangup_safe(&command.application_name)
            {
                debug!(
                    application = %command.application_name,
                    "rejecting command queued after hangup"
                );
                self.publish_command_error(&command, None).await;
                continue;
            }

            let leg = self.state.target_leg(&command);
            match self
                .services
                .driver
                .exec_cmd(&self.state.node, &leg, &command, &self.state.control_q)
                .await
            {
                Ok(ExecOutcome::Fired) => continue,
                Ok(ExecOutcome::Pending(event_uuid)) => {
                    debug!(
                        application = %command.application_name,
                        %event_uuid,
                        "command in flight"
                    );
                    self.state.set_in_flight(command, event_uuid);
                    return;
                }
                Err(driver_error) => {
                    let message = self.describe_driver_error(&leg, &command, &driver_error);
                    self.publish_command_error(&command, message.as_deref()).await;
                    continue;
                }
            }
        }
    }

    /// Map a driver failure to the error message reported on the bus.
    /// `None` falls back to the generic execution-error text.
    pub(crate) fn describe_driver_error(
        &self,
        leg: &CallId,
        command: &CommandRecord,
        driver_error: &DriverError,
    ) -> Option<String> {
        match driver_error {
            DriverError::SessionNotFound { .. } => Some(format!(
                "Session {} not found for {}",
                leg, command.application_name
            )),
            DriverError::Rejected { reason } => Some(reason.clone()),
            DriverError::Transport { message } => {
                error!(
                    application = %command.application_name,
                    %message,
                    "switch driver failure while executing command"
                );
                None
            }
        }
    }
}
