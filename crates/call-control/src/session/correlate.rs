//! Execute-complete correlation
//!
//! Decides whether an incoming execute-complete retires the in-flight
//! command. Only an event carrying the stored correlation token can
//! advance the queue; everything else is logged and ignored, because a
//! late completion from a previous command generation must never retire
//! the wrong command.

use serde_json::{Map, Value};
use tracing::debug;

use crate::command::record::{GROUP_ID, NOOP_APP, PLAYBACK_APP};
use crate::command::FilterSpec;
use crate::events::{APPLICATION_RESPONSE, DTMF_DIGIT};
use crate::types::EventUuid;

use super::actor::ControlSession;

impl ControlSession {
    pub(crate) async fn handle_execute_complete(
        &mut self,
        application_name: Option<String>,
        event_uuid: Option<EventUuid>,
        body: Map<String, Value>,
    ) {
        let (Some(mut application), Some(event_uuid)) = (application_name, event_uuid) else {
            debug!("ignoring execute-complete without name or token");
            return;
        };
        let Some(current_uuid) = self.state.current_cmd_uuid.clone() else {
            debug!(%event_uuid, "execute-complete with nothing in flight");
            return;
        };

        // The equivalence step can rewrite the raw switch application name
        // to the logical in-flight one and re-run the table; one rewrite
        // is enough, so this loops at most twice.
        loop {
            // A noop completion must answer the in-flight msg id; anything
            // else is a sync point from a previous command generation.
            if application == NOOP_APP && event_uuid == current_uuid {
                let response = body.get(APPLICATION_RESPONSE).and_then(Value::as_str);
                if response == self.state.msg_id.as_deref() {
                    self.advance_after_completion().await;
                } else {
                    debug!(
                        response = response.unwrap_or_default(),
                        "stale noop completion ignored"
                    );
                }
                return;
            }

            let name_matches = self.state.current_app.as_deref() == Some(application.as_str());

            // A playback that ended on a DTMF digit also takes the rest of
            // its logical group off the head of the queue.
            if application == PLAYBACK_APP && name_matches && event_uuid == current_uuid {
                if body.get(DTMF_DIGIT).and_then(Value::as_str).is_some() {
                    if let Some(group_id) = body.get(GROUP_ID).and_then(Value::as_str) {
                        let dropped = self
                            .state
                            .command_q
                            .filter(&[FilterSpec::playback_group(group_id)]);
                        debug!(dropped, group_id, "DTMF terminator dropped grouped playback");
                    }
                }
                self.advance_after_completion().await;
                return;
            }

            if name_matches && event_uuid == current_uuid {
                self.advance_after_completion().await;
                return;
            }

            // Token matches but the name does not: one logical command can
            // surface as several switch applications. If the raw name is
            // in the in-flight command's equivalence set, rerun as a
            // match; otherwise it is an intermediate side effect of the
            // running application.
            if event_uuid == current_uuid {
                let Some(current_app) = self.state.current_app.clone() else {
                    debug!("token matches but no application recorded; ignoring");
                    return;
                };
                let equivalents = self.services.driver.switch_application_names(&current_app);
                if equivalents.iter().any(|name| *name == application) {
                    application = current_app;
                    continue;
                }
                debug!(
                    raw_application = %application,
                    in_flight = %current_app,
                    "intermediate switch event ignored"
                );
                return;
            }

            debug!(
                application = %application,
                %event_uuid,
                "unmatched execute-complete ignored"
            );
            return;
        }
    }

    async fn advance_after_completion(&mut self) {
        self.state.clear_in_flight();
        self.advance().await;
    }
}
