//! Test doubles for the file transfer engine.
//!
//! [`SimulatedDevice`] is a complete in-memory remote with fault injection;
//! [`ScriptedTransport`] replays canned responses.

mod device;
mod scripted;

pub use device::{DEFAULT_MAX_FRAME_LENGTH, Fault, FaultRule, SimulatedDevice};
pub use scripted::ScriptedTransport;

/// One invoke seen by a test transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub object_index: u8,
    pub command: u8,
    pub payload: Option<Vec<u8>>,
}
