//! Remote status codes and their typed errors.

use serde::Serialize;

use crate::ProtocolError;
use crate::constants::STATUS_OK;

/// A rejection reported by the remote device through a known status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
#[repr(u8)]
pub enum RemoteError {
    #[error("formatting of the file system failed")]
    FormatFailed = 0x02,

    #[error("requested chunk length exceeds the size allowed by the device")]
    ChunkTooLarge = 0x04,

    #[error("file already open")]
    FileAlreadyOpen = 0x41,

    #[error("file can't be opened")]
    FileOpenFailed = 0x42,

    #[error("file not opened")]
    FileNotOpened = 0x43,

    #[error("deleting the file failed")]
    FileDeleteFailed = 0x44,

    #[error("renaming the file failed")]
    FileRenameFailed = 0x45,

    #[error("file can't seek to position")]
    FileSeekFailed = 0x46,

    #[error("file could not be written completely")]
    IncompleteWrite = 0x47,

    #[error("directory already open")]
    DirAlreadyOpen = 0x81,

    #[error("directory can't be opened")]
    DirOpenFailed = 0x82,

    #[error("directory not opened")]
    DirNotOpened = 0x83,

    #[error("deleting the directory failed")]
    DirDeleteFailed = 0x84,

    #[error("creating the directory failed")]
    DirCreateFailed = 0x85,
}

impl RemoteError {
    const TABLE: [RemoteError; 14] = [
        RemoteError::FormatFailed,
        RemoteError::ChunkTooLarge,
        RemoteError::FileAlreadyOpen,
        RemoteError::FileOpenFailed,
        RemoteError::FileNotOpened,
        RemoteError::FileDeleteFailed,
        RemoteError::FileRenameFailed,
        RemoteError::FileSeekFailed,
        RemoteError::IncompleteWrite,
        RemoteError::DirAlreadyOpen,
        RemoteError::DirOpenFailed,
        RemoteError::DirNotOpened,
        RemoteError::DirDeleteFailed,
        RemoteError::DirCreateFailed,
    ];

    /// Maps a non-zero status byte to its typed error.
    ///
    /// Codes outside the table are a protocol violation and yield
    /// [`ProtocolError::UnknownStatusCode`]; so does `0x00`, which is not
    /// an error at all.
    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        Self::TABLE
            .into_iter()
            .find(|e| e.code() == code)
            .ok_or(ProtocolError::UnknownStatusCode(code))
    }

    /// The status byte as sent on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Classifies a status byte: success, known rejection, or unknown code.
pub fn check_code(code: u8) -> Result<(), ProtocolError> {
    if code == STATUS_OK {
        return Ok(());
    }
    Err(ProtocolError::Remote(RemoteError::from_code(code)?))
}
