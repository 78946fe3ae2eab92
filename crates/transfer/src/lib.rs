//! Chunked file transfer and remote file management over a bounded-frame
//! request/response transport.
//!
//! [`FileTransferEngine`] is the entry point. It encodes requests with
//! [`ftm_protocol`], drives them through a [`Transport`], and runs uploads
//! and downloads as a [`TransferSession`] with bounded retries.

mod config;
mod engine;
mod error;
mod listing;
mod progress;
mod retry;
mod session;
mod transport;
mod types;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, EngineConfig};
pub use engine::{FileTransferEngine, LOCAL_VERSION};
pub use error::TransferError;
pub use listing::DirectoryLister;
pub use progress::{
    DEFAULT_SPEED_SAMPLES, EventCallback, MIN_SPEED_SAMPLES, ProgressReport, ProgressTracker,
    SpeedCalculator, TransferEvent,
};
pub use retry::{Attempt, DEFAULT_MAX_ATTEMPTS, RetryPolicy};
pub use session::TransferSession;
pub use transport::{Transport, TransportError, TransportFuture};
pub use types::{TransferOptions, TransferPhase, TransferState, TransferSummary};

pub use ftm_protocol::{DirectoryEntry, FileInfo, ProtocolError, ProtocolVersion, RemoteError};
