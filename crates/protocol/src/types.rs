use serde::{Deserialize, Serialize};

/// Size and checksum of a remote file, as reported by an Info query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File size in bytes.
    pub size: u32,
    /// Checksum field exactly as sent by the device (big-endian).
    pub crc: [u8; 4],
}

impl FileInfo {
    /// The CRC16 carried in the low-order half of the checksum field.
    pub fn crc16(&self) -> u16 {
        u16::from_be_bytes([self.crc[2], self.crc[3]])
    }

    /// Upper-case hex rendering of the raw checksum field.
    pub fn crc_hex(&self) -> String {
        self.crc.iter().map(|b| format!("{b:02X}")).collect()
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub is_file: bool,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_file: true,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_file: false,
        }
    }
}

/// Decoded body of a single listing exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingItem {
    /// The remote side has no more entries.
    End,
    Entry(DirectoryEntry),
    /// An entry kind this client does not know; carries the raw kind byte.
    Unknown(u8),
}

/// Firmware version of the remote file transfer module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
}

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u16, build: u16) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Returns `true` if both sides share the same major version.
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Acknowledgement of one upload chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadAck {
    /// Sequence number echoed by the device.
    pub sequence: u16,
    /// CRC16 the device computed over the received request bytes.
    pub crc: u16,
}

/// A decoded download chunk response, borrowing from the raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadChunk<'a> {
    pub sequence: u16,
    pub payload: &'a [u8],
    /// CRC16 transmitted by the device.
    pub crc: u16,
    /// CRC16 computed locally over sequence, length and payload.
    pub computed_crc: u16,
}

impl DownloadChunk<'_> {
    /// Returns `true` if the transmitted and computed checksums agree.
    pub fn crc_ok(&self) -> bool {
        self.crc == self.computed_crc
    }
}
