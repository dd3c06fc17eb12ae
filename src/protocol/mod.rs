//! Device link protocol: framing, classification, state and command correlation.
//!
//! ```text
//! bytes -> LineFramer -> ProtocolMachine -> ChannelRegistry (telemetry)
//!                                        -> LinkShared      (state, completion)
//! caller -> Rendezvous -> Command::to_wire -> transport
//! ```

pub mod command;
pub mod framer;
pub mod machine;
pub mod rendezvous;
pub mod state;

pub use command::Command;
pub use framer::LineFramer;
pub use machine::{classify, parse_telemetry, LineKind, ProtocolMachine};
pub use rendezvous::Rendezvous;
pub use state::{LinkShared, LinkState};
