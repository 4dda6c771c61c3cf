//! Dialplan commands: records, the pending queue, and prefix filtering.

pub mod filter;
pub mod queue;
pub mod record;

pub use filter::{filter_queue, parse_filter_applications, FilterSpec};
pub use queue::CommandQueue;
pub use record::{Command, CommandRecord};
