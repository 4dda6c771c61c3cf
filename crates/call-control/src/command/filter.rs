//! Cooperative early termination of queued commands
//!
//! A DTMF terminator on a playback run does not just retire the in-flight
//! command; it also drops the rest of that logical group from the front of
//! the queue. The specs come either from the event correlator (playback
//! group drop) or from a `noop` command's `Filter-Applications` list.
//!
//! The walk is lockstep over the spec list and the queue head: a matching
//! head is popped and the same spec is retried (so a streak of same-app
//! commands goes in one spec), a mismatching head advances to the next spec
//! without popping. The walk ends when either side is exhausted, so the
//! result is always a suffix of the input queue.

use std::collections::VecDeque;

use serde_json::{Map, Value};

use super::record::{CommandRecord, APPLICATION_NAME};

/// Field on a structured filter spec holding the key/value constraints.
const FIELDS: &str = "Fields";

/// One filter entry: either a bare application name or a name plus field
/// constraints that must all hold on the candidate command.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    Application(String),
    Matching {
        application_name: String,
        fields: Map<String, Value>,
    },
}

impl FilterSpec {
    /// Read a spec from a `Filter-Applications` entry.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(name) if !name.is_empty() => Some(Self::Application(name.clone())),
            Value::Object(spec) => {
                let application_name = spec
                    .get(APPLICATION_NAME)
                    .and_then(Value::as_str)
                    .filter(|name| !name.is_empty())?
                    .to_string();
                let fields = spec
                    .get(FIELDS)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                Some(Self::Matching {
                    application_name,
                    fields,
                })
            }
            _ => None,
        }
    }

    /// Spec matching a playback group, for the DTMF terminator drop.
    pub fn playback_group(group_id: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(
            super::record::GROUP_ID.to_string(),
            Value::String(group_id.to_string()),
        );
        Self::Matching {
            application_name: super::record::PLAYBACK_APP.to_string(),
            fields,
        }
    }

    pub fn matches(&self, command: &CommandRecord) -> bool {
        match self {
            Self::Application(name) => command.application_name == *name,
            Self::Matching {
                application_name,
                fields,
            } => {
                command.application_name == *application_name
                    && fields
                        .iter()
                        .all(|(key, value)| command.raw.get(key) == Some(value))
            }
        }
    }
}

/// Read a `Filter-Applications` array, skipping entries that are neither a
/// name nor a structured spec.
pub fn parse_filter_applications(value: &Value) -> Vec<FilterSpec> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let spec = FilterSpec::from_json(entry);
            if spec.is_none() {
                tracing::warn!("ignoring unparseable filter application entry");
            }
            spec
        })
        .collect()
}

/// Drop the leading run of commands matched by `specs`. Returns the number
/// of commands dropped.
pub fn filter_queue(specs: &[FilterSpec], queue: &mut VecDeque<CommandRecord>) -> usize {
    let mut dropped = 0;
    let mut current = 0;
    while let Some(head) = queue.front() {
        let Some(spec) = specs.get(current) else {
            break;
        };
        if spec.matches(head) {
            queue.pop_front();
            dropped += 1;
        } else {
            current += 1;
        }
    }
    dropped
}
