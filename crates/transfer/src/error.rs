//! Error types for transfers and remote file operations.

use ftm_protocol::{ProtocolError, ProtocolVersion, RemoteError};

use crate::transport::TransportError;
use crate::types::TransferPhase;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("checksum mismatch (expected 0x{expected:04X}, got 0x{actual:04X})")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("sequence mismatch (sent {sent}, acknowledged {acked})")]
    SequenceMismatch { sent: u16, acked: u16 },

    #[error("too many errors: gave up after {attempts} attempts ({last})")]
    TooManyErrors {
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("incompatible remote major version: {remote} (local {local})")]
    IncompatibleVersion {
        remote: ProtocolVersion,
        local: ProtocolVersion,
    },

    #[error("invalid chunk length {length}: must be between {min} and {max}")]
    InvalidChunkLength { length: usize, min: usize, max: usize },

    #[error("session already used (phase {0:?})")]
    InvalidState(TransferPhase),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// The remote rejection behind this error, if any.
    pub fn remote_error(&self) -> Option<RemoteError> {
        match self {
            TransferError::Protocol(ProtocolError::Remote(e)) => Some(*e),
            TransferError::TooManyErrors { last, .. } => last.remote_error(),
            _ => None,
        }
    }

    /// Returns `true` for failures worth re-sending the same chunk for:
    /// transport glitches and corrupted or inconsistent responses.
    ///
    /// Remote rejections, unknown status codes and local errors are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Transport(_)
            | TransferError::ChecksumMismatch { .. }
            | TransferError::SequenceMismatch { .. } => true,
            TransferError::Protocol(ProtocolError::Malformed(_)) => true,
            _ => false,
        }
    }

    /// Returns `true` if the error should trigger a transport reconnect.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, TransferError::Transport(e) if e.is_connection_loss())
    }
}
