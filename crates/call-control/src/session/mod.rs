//! The per-call control session
//!
//! One actor per live call. `actor` owns the mailbox loop and timers;
//! `ingest`, `advance`, `correlate`, and `lifecycle` each add one concern
//! to the session; `state` is the datum they all mutate.

pub mod actor;
pub mod advance;
pub mod correlate;
pub mod ingest;
pub mod lifecycle;
pub mod state;

pub use actor::{ControlSession, SessionContext, SessionServices};
pub use state::{SessionSnapshot, SessionState};
