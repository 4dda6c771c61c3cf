//! Command ingestion
//!
//! Validates dialplan payloads off the bus, explodes `queue` batches, and
//! places each command according to its `Insert-At`. `dialplan/command` and
//! `conference/command` arrive through the same path and are not told
//! apart here.

use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::execute_error_payload;
use crate::command::record::{FILTER_APPLICATIONS, NOOP_APP};
use crate::command::{parse_filter_applications, Command, CommandRecord};
use crate::driver::{ExecOutcome, API_UUID_BREAK};

use super::actor::ControlSession;

impl ControlSession {
    /// Ingest one decoded bus command payload.
    pub(crate) async fn handle_dialplan(&mut self, payload: Value) {
        let command = match Command::from_json(&payload) {
            Ok(command) => command,
            Err(error) => {
                debug!(%error, "dropping malformed dialplan command");
                return;
            }
        };

        if !self.state.is_call_up {
            // A late command restarts the post-hangup linger so its error
            // reply can still make it out before the session dies.
            self.arm_keep_alive();
        }

        match command {
            Command::Tail(record) => self.insert_tail(record),
            Command::Head(record) => self.insert_head(record),
            Command::Now(record) => self.execute_now(record).await,
            Command::Flush(record) => self.flush_and_insert(record).await,
        }

        self.maybe_advance().await;
    }

    fn insert_tail(&mut self, record: CommandRecord) {
        if record.is_batch() {
            match record.explode() {
                Ok(children) => {
                    for child in children {
                        self.state.command_q.push_tail(child);
                    }
                }
                Err(error) => debug!(%error, "dropping malformed command batch"),
            }
            return;
        }
        self.state.command_q.push_tail(record);
    }

    fn insert_head(&mut self, record: CommandRecord) {
        if record.is_batch() {
            match record.explode() {
                Ok(children) => {
                    // Reversed so the batch keeps its original order once
                    // it sits at the head.
                    for child in children.into_iter().rev() {
                        self.state.command_q.push_head(child);
                    }
                }
                Err(error) => debug!(%error, "dropping malformed command batch"),
            }
            return;
        }
        self.state.command_q.push_head(record);
    }

    /// `Insert-At: now`: run on the switch immediately, concurrently with
    /// whatever is in flight. Completions of `now` commands are not waited
    /// on and are never part of filter bookkeeping.
    async fn execute_now(&mut self, record: CommandRecord) {
        if !self.state.is_node_up {
            warn!(
                application = %record.application_name,
                "rejecting immediate command while the media node is down"
            );
            let payload = execute_error_payload(&self.state.call_id, &record);
            if let Err(error) = self
                .services
                .bus
                .publish_call_event(&self.state.call_id, payload)
                .await
            {
                warn!(%error, "failed to publish execute error");
            }
            return;
        }

        if record.application_name == NOOP_APP {
            let specs = record
                .raw
                .get(FILTER_APPLICATIONS)
                .map(parse_filter_applications)
                .unwrap_or_default();
            let dropped = self.state.command_q.filter(&specs);
            debug!(dropped, "noop filtered the command queue");
            return;
        }

        if record.is_batch() {
            match record.explode() {
                Ok(children) => {
                    for child in children {
                        self.execute_one_now(child).await;
                    }
                }
                Err(error) => debug!(%error, "dropping malformed command batch"),
            }
            return;
        }
        self.execute_one_now(record).await;
    }

    async fn execute_one_now(&mut self, record: CommandRecord) {
        let leg = self.state.target_leg(&record);
        match self
            .services
            .driver
            .exec_cmd(&self.state.node, &leg, &record, &self.state.control_q)
            .await
        {
            Ok(ExecOutcome::Fired) => {}
            Ok(ExecOutcome::Pending(event_uuid)) => {
                debug!(
                    application = %record.application_name,
                    %event_uuid,
                    "immediate command launched; completion will not be awaited"
                );
            }
            Err(error) => {
                let message = self.describe_driver_error(&leg, &record, &error);
                self.publish_command_error(&record, message.as_deref()).await;
            }
        }
    }

    /// `Insert-At: flush`: break everything queued on the switch, drop
    /// our queue, then enqueue the new command at the tail.
    async fn flush_and_insert(&mut self, record: CommandRecord) {
        let args = format!("{} all", self.state.call_id);
        if let Err(error) = self
            .services
            .driver
            .api(&self.state.node, API_UUID_BREAK, &args)
            .await
        {
            warn!(%error, "uuid_break failed during flush");
        }
        let dropped = self.state.command_q.flush();
        debug!(dropped, "flushed the command queue");
        self.insert_tail(record);
        self.force_advance().await;
    }
}
