use serde::{Deserialize, Serialize};

/// Function-property object index that carries every file transfer command.
pub const OBJECT_INDEX: u8 = 159;

/// Bytes the transport adds around a payload (opcode framing).
///
/// A payload of `n` bytes only fits when `n + FRAME_OVERHEAD <= max_frame_length`.
pub const FRAME_OVERHEAD: usize = 2;

/// Header bytes in an upload chunk: sequence (2) + byte count (1).
pub const UPLOAD_CHUNK_OVERHEAD: usize = 3;

/// Non-payload bytes in a download chunk response:
/// status (1) + sequence (2) + byte count (1) + CRC (2).
pub const DOWNLOAD_CHUNK_OVERHEAD: usize = 6;

/// Frame sent after the last upload chunk to close the remote file.
pub const UPLOAD_TERMINATOR: [u8; 2] = [0xFF, 0xFF];

/// Largest chunk length the one-byte length field can describe.
pub const MAX_CHUNK_LENGTH: usize = u8::MAX as usize;

/// Directory listing entry kind: end of listing.
pub const ENTRY_END: u8 = 0x00;
/// Directory listing entry kind: regular file.
pub const ENTRY_FILE: u8 = 0x01;
/// Directory listing entry kind: directory.
pub const ENTRY_DIR: u8 = 0x02;

/// Status byte reported for a successful exchange.
pub const STATUS_OK: u8 = 0x00;

/// Command opcodes understood by the remote file transfer module.
///
/// The numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Format = 0,
    Exists = 1,
    Rename = 2,
    FileUpload = 40,
    FileDownload = 41,
    FileDelete = 42,
    FileInfo = 43,
    DirList = 80,
    DirCreate = 81,
    DirDelete = 82,
    Cancel = 90,
    GetVersion = 100,
}

impl Command {
    /// Every command, in opcode order.
    pub const ALL: [Command; 12] = [
        Command::Format,
        Command::Exists,
        Command::Rename,
        Command::FileUpload,
        Command::FileDownload,
        Command::FileDelete,
        Command::FileInfo,
        Command::DirList,
        Command::DirCreate,
        Command::DirDelete,
        Command::Cancel,
        Command::GetVersion,
    ];

    /// Returns the wire opcode.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Looks up a command by opcode.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Format => "format",
            Command::Exists => "exists",
            Command::Rename => "rename",
            Command::FileUpload => "file_upload",
            Command::FileDownload => "file_download",
            Command::FileDelete => "file_delete",
            Command::FileInfo => "file_info",
            Command::DirList => "dir_list",
            Command::DirCreate => "dir_create",
            Command::DirDelete => "dir_delete",
            Command::Cancel => "cancel",
            Command::GetVersion => "get_version",
        };
        f.write_str(name)
    }
}
