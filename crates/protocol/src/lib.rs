//! Wire protocol of the remote file transfer module.
//!
//! Every exchange is one function-property request on [`OBJECT_INDEX`] with
//! a one-byte [`Command`] and a small payload; every response starts with a
//! status byte. See [`codec`] for the byte layouts.

pub mod codec;
pub mod constants;
pub mod crc;
pub mod status;
pub mod types;

pub use constants::{Command, OBJECT_INDEX};
pub use crc::crc16;
pub use status::RemoteError;
pub use types::{DirectoryEntry, FileInfo, ListingItem, ProtocolVersion};

/// Errors produced while encoding requests or decoding responses.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("path too long: {required} bytes exceed the maximum frame length of {max}")]
    PathTooLong { required: usize, max: usize },

    #[error("listing path must be ASCII: {0}")]
    NonAsciiPath(String),

    #[error("chunk payload too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    #[error("unknown remote status code 0x{0:02X}")]
    UnknownStatusCode(u8),

    #[error("remote rejected request: {0}")]
    Remote(#[from] RemoteError),

    #[error("malformed response: {0}")]
    Malformed(String),
}
