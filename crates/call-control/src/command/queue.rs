//! Pending command queue
//!
//! FIFO of validated dialplan commands waiting for the switch. Mutations
//! come from ingestion (head/tail/flush inserts), the advance engine (pop),
//! and DTMF early termination (prefix filter).

use std::collections::VecDeque;

use super::filter::{filter_queue, FilterSpec};
use super::record::CommandRecord;

/// Ordered sequence of pending dialplan commands.
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: VecDeque<CommandRecord>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue at the end. Commands with an empty application name are
    /// dropped.
    pub fn push_tail(&mut self, command: CommandRecord) {
        if command.application_name.is_empty() {
            tracing::debug!("dropping queued command without an application name");
            return;
        }
        self.inner.push_back(command);
    }

    /// Enqueue at the front. Commands with an empty application name are
    /// dropped.
    pub fn push_head(&mut self, command: CommandRecord) {
        if command.application_name.is_empty() {
            tracing::debug!("dropping queued command without an application name");
            return;
        }
        self.inner.push_front(command);
    }

    /// Dequeue the next command, oldest first.
    pub fn pop(&mut self) -> Option<CommandRecord> {
        self.inner.pop_front()
    }

    /// Drop the leading run of commands matched by `specs`. Returns how
    /// many were dropped.
    pub fn filter(&mut self, specs: &[FilterSpec]) -> usize {
        filter_queue(specs, &mut self.inner)
    }

    /// Drop everything.
    pub fn flush(&mut self) -> usize {
        let dropped = self.inner.len();
        self.inner.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Application names still queued, in order. Used for logging and
    /// assertions.
    pub fn application_names(&self) -> Vec<&str> {
        self.inner
            .iter()
            .map(|command| command.application_name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(app: &str) -> CommandRecord {
        CommandRecord::from_json(json!({ "Application-Name": app }).as_object().unwrap()).unwrap()
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut queue = CommandQueue::new();
        queue.push_tail(command("playback"));
        queue.push_tail(command("bridge"));
        queue.push_head(command("answer"));

        assert_eq!(queue.application_names(), vec!["answer", "playback", "bridge"]);
        assert_eq!(queue.pop().unwrap().application_name, "answer");
        assert_eq!(queue.pop().unwrap().application_name, "playback");
        assert_eq!(queue.pop().unwrap().application_name, "bridge");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn nameless_commands_are_ignored() {
        let mut queue = CommandQueue::new();
        let mut nameless = command("playback");
        nameless.application_name.clear();
        queue.push_tail(nameless.clone());
        queue.push_head(nameless);
        assert!(queue.is_empty());
    }

    #[test]
    fn flush_empties_the_queue() {
        let mut queue = CommandQueue::new();
        queue.push_tail(command("playback"));
        queue.push_tail(command("bridge"));
        assert_eq!(queue.flush(), 2);
        assert!(queue.is_empty());
    }
}
