//! Control session configuration

use std::time::Duration;

/// Tunables for one control session.
///
/// Loaded by the supervisor that spawns sessions; every timer the session
/// arms takes its duration from here so tests can run the whole lifecycle
/// in milliseconds.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// How often the session confirms with the channel registry that its
    /// call id still exists.
    pub sanity_check_period: Duration,

    /// How long to hold the queue waiting for a down media node to return
    /// before treating the call as destroyed.
    pub node_down_max_wait: Duration,

    /// How long the session lingers after the channel is destroyed, so
    /// late commands can still be accepted (and errored) and late events
    /// drained.
    pub post_hangup_keep_alive: Duration,

    /// Application names that may still be dispatched to the switch after
    /// the channel is gone. Everything else queued post-hangup is answered
    /// with a dialplan error.
    pub post_hangup_safe_apps: Vec<String>,
}

impl ControlConfig {
    pub fn is_post_hangup_safe(&self, application_name: &str) -> bool {
        self.post_hangup_safe_apps
            .iter()
            .any(|app| app == application_name)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            sanity_check_period: Duration::from_secs(60),
            node_down_max_wait: Duration::from_secs(10),
            post_hangup_keep_alive: Duration::from_secs(2),
            post_hangup_safe_apps: vec!["hangup".to_string()],
        }
    }
}
