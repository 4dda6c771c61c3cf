//! MediaGate call control
//!
//! The per-call control session of the MediaGate media-switch gateway. The
//! gateway sits between a media switch and the application bus: call-flow
//! logic publishes JSON dialplan commands on the bus, and for every live
//! call one [`ControlSession`] actor serialises those commands onto the
//! switch, correlates each with the execute-complete event the switch
//! emits when the application finishes, and tracks the call's lifecycle
//! (hangup, transfer, replacement, node outage) until the post-hangup
//! keep-alive lets it go.
//!
//! The collaborating services (the switch driver, the bus publisher, the
//! channel registry, and the event producer) are injected as trait
//! objects ([`SwitchDriver`], [`BusPublisher`], [`ChannelRegistry`],
//! [`EventStream`]), so the session itself is a pure state machine over
//! one mailbox and tests can drive it end to end with in-memory fakes.

pub mod bus;
pub mod command;
pub mod config;
pub mod driver;
pub mod errors;
pub mod events;
pub mod registry;
pub mod session;
pub mod types;

pub use bus::BusPublisher;
pub use command::{Command, CommandQueue, CommandRecord, FilterSpec};
pub use config::ControlConfig;
pub use driver::{DriverError, ExecOutcome, SwitchDriver};
pub use errors::{ControlError, Result};
pub use events::{EventStream, SessionMsg, SwitchEvent};
pub use registry::{ChannelRegistry, ControlRegistry, SessionHandle};
pub use session::{ControlSession, SessionContext, SessionServices, SessionSnapshot};
pub use types::{CallId, EventUuid, FetchId, NodeId};
