//! Request encoders and response decoders for every command.
//!
//! # Wire format
//!
//! ```text
//! PATH ARG:          [path UTF-8][0x00]
//! RENAME:            [old path][0x00][new path][0x00]
//! TRANSFER HEADER:   [0x00 0x00 (seq 0)][chunk_length][path][0x00]
//! UPLOAD CHUNK:      [seq LE 2][count][payload count]
//! UPLOAD TERMINATOR: [0xFF 0xFF]
//! DOWNLOAD REQUEST:  [seq LE 2]
//!
//! RESPONSE (all):    [status][body...]
//!   exists           [status][0x01 = present]
//!   file info        [status][size BE 4][crc 4]
//!   dir list         [status][kind][name ASCII...]
//!   download header  [status][size LE 4]
//!   upload ack       [status][seq LE 2][crc BE 2]
//!   download chunk   [status][seq LE 2][count][payload count][crc BE 2]
//!   version          [major BE 2][minor BE 2][build BE 2]   (no status byte)
//! ```

use crate::ProtocolError;
use crate::constants::{
    DOWNLOAD_CHUNK_OVERHEAD, ENTRY_DIR, ENTRY_END, ENTRY_FILE, FRAME_OVERHEAD, MAX_CHUNK_LENGTH,
};
use crate::crc::crc16;
use crate::status::check_code;
use crate::types::{DirectoryEntry, DownloadChunk, FileInfo, ListingItem, ProtocolVersion, UploadAck};

fn ensure_fits(payload_len: usize, max_frame_length: usize) -> Result<(), ProtocolError> {
    let required = payload_len + FRAME_OVERHEAD;
    if required > max_frame_length {
        return Err(ProtocolError::PathTooLong {
            required,
            max: max_frame_length,
        });
    }
    Ok(())
}

fn push_path(buf: &mut Vec<u8>, path: &str) {
    buf.extend_from_slice(path.as_bytes());
    buf.push(0x00);
}

fn malformed(what: &str, response: &[u8]) -> ProtocolError {
    ProtocolError::Malformed(format!("{what}: {} byte response", response.len()))
}

// ---------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------

/// Encodes a single NUL-terminated UTF-8 path argument.
pub fn encode_path(path: &str, max_frame_length: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(path.len() + 1);
    push_path(&mut buf, path);
    ensure_fits(buf.len(), max_frame_length)?;
    Ok(buf)
}

/// Encodes the two paths of a rename; the combined length must fit one frame.
pub fn encode_rename(
    from: &str,
    to: &str,
    max_frame_length: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(from.len() + to.len() + 2);
    push_path(&mut buf, from);
    push_path(&mut buf, to);
    ensure_fits(buf.len(), max_frame_length)?;
    Ok(buf)
}

/// Encodes the path argument of a directory listing.
///
/// Listing paths travel as single-byte ASCII, unlike every other path.
pub fn encode_list_path(path: &str, max_frame_length: usize) -> Result<Vec<u8>, ProtocolError> {
    if !path.is_ascii() {
        return Err(ProtocolError::NonAsciiPath(path.to_string()));
    }
    encode_path(path, max_frame_length)
}

/// Encodes the opening exchange of an upload or download.
pub fn encode_transfer_header(
    chunk_length: u8,
    path: &str,
    max_frame_length: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(path.len() + 4);
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.push(chunk_length);
    push_path(&mut buf, path);
    ensure_fits(buf.len(), max_frame_length)?;
    Ok(buf)
}

/// Encodes one upload chunk: sequence, byte count, payload.
pub fn encode_upload_chunk(sequence: u16, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let count = u8::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLong {
        len: payload.len(),
        max: MAX_CHUNK_LENGTH,
    })?;
    let mut buf = Vec::with_capacity(payload.len() + 3);
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.push(count);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encodes a download chunk request.
pub fn encode_download_request(sequence: u16) -> [u8; 2] {
    sequence.to_le_bytes()
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

/// Returns the status byte that prefixes every response.
pub fn decode_status(response: &[u8]) -> Result<u8, ProtocolError> {
    response
        .first()
        .copied()
        .ok_or_else(|| ProtocolError::Malformed("empty response".into()))
}

/// Fails with the mapped error unless the response reports success.
pub fn check_status(response: &[u8]) -> Result<(), ProtocolError> {
    check_code(decode_status(response)?)
}

/// Decodes an Exists response.
pub fn decode_exists(response: &[u8]) -> Result<bool, ProtocolError> {
    check_status(response)?;
    let flag = response
        .get(1)
        .ok_or_else(|| malformed("exists", response))?;
    Ok(*flag == 0x01)
}

/// Decodes an Info response.
pub fn decode_file_info(response: &[u8]) -> Result<FileInfo, ProtocolError> {
    check_status(response)?;
    if response.len() < 9 {
        return Err(malformed("file info", response));
    }
    let size = u32::from_be_bytes([response[1], response[2], response[3], response[4]]);
    let crc = [response[5], response[6], response[7], response[8]];
    Ok(FileInfo { size, crc })
}

/// Decodes one directory listing exchange.
pub fn decode_listing_item(response: &[u8]) -> Result<ListingItem, ProtocolError> {
    check_status(response)?;
    let kind = *response
        .get(1)
        .ok_or_else(|| malformed("dir list", response))?;

    let name = || decode_ascii(&response[2..]);
    Ok(match kind {
        ENTRY_END => ListingItem::End,
        ENTRY_FILE => ListingItem::Entry(DirectoryEntry::file(name())),
        ENTRY_DIR => ListingItem::Entry(DirectoryEntry::dir(name())),
        other => ListingItem::Unknown(other),
    })
}

/// Single-byte decoding; bytes outside ASCII become `?`.
fn decode_ascii(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0x00)
        .map_or(0, |i| i + 1);
    bytes[..end]
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

/// Decodes a GetVersion response.
///
/// Each field is a little-endian pair stored byte-swapped, i.e. big-endian.
/// The response has no separate status byte: the high byte of `major`
/// occupies that position.
pub fn decode_version(response: &[u8]) -> Result<ProtocolVersion, ProtocolError> {
    if response.len() < 6 {
        return Err(malformed("version", response));
    }
    let field = |i: usize| u16::from_be_bytes([response[i], response[i + 1]]);
    Ok(ProtocolVersion::new(field(0), field(2), field(4)))
}

/// Decodes the header acknowledgement of a download: the total file size.
pub fn decode_download_header(response: &[u8]) -> Result<u32, ProtocolError> {
    check_status(response)?;
    if response.len() < 5 {
        return Err(malformed("download header", response));
    }
    Ok(u32::from_le_bytes([
        response[1],
        response[2],
        response[3],
        response[4],
    ]))
}

/// Decodes the acknowledgement of an upload chunk.
pub fn decode_upload_ack(response: &[u8]) -> Result<UploadAck, ProtocolError> {
    check_status(response)?;
    if response.len() < 5 {
        return Err(malformed("upload ack", response));
    }
    Ok(UploadAck {
        sequence: u16::from_le_bytes([response[1], response[2]]),
        crc: u16::from_be_bytes([response[3], response[4]]),
    })
}

/// Decodes a download chunk and computes its checksum.
///
/// The CRC covers sequence, byte count and payload; the declared byte count
/// must account for the whole response.
pub fn decode_download_chunk(response: &[u8]) -> Result<DownloadChunk<'_>, ProtocolError> {
    check_status(response)?;
    if response.len() < DOWNLOAD_CHUNK_OVERHEAD {
        return Err(malformed("download chunk", response));
    }
    let count = response[3] as usize;
    if response.len() != count + DOWNLOAD_CHUNK_OVERHEAD {
        return Err(ProtocolError::Malformed(format!(
            "download chunk declares {count} payload bytes but response has {} bytes",
            response.len()
        )));
    }
    let crc_at = 4 + count;
    Ok(DownloadChunk {
        sequence: u16::from_le_bytes([response[1], response[2]]),
        payload: &response[4..crc_at],
        crc: u16::from_be_bytes([response[crc_at], response[crc_at + 1]]),
        computed_crc: crc16(&response[1..crc_at]),
    })
}

/// Splits a NUL-terminated UTF-8 string off the front of `bytes`.
///
/// Returns the string and the remaining bytes after the terminator.
pub fn decode_path(bytes: &[u8]) -> Result<(String, &[u8]), ProtocolError> {
    let nul = bytes
        .iter()
        .position(|&b| b == 0x00)
        .ok_or_else(|| ProtocolError::Malformed("path is not NUL-terminated".into()))?;
    let path = std::str::from_utf8(&bytes[..nul])
        .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8 path: {e}")))?;
    Ok((path.to_string(), &bytes[nul + 1..]))
}
