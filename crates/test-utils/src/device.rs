//! In-memory remote device speaking the file transfer protocol.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ftm_protocol::codec::decode_path;
use ftm_protocol::constants::{
    DOWNLOAD_CHUNK_OVERHEAD, ENTRY_DIR, ENTRY_END, ENTRY_FILE, FRAME_OVERHEAD, STATUS_OK,
    UPLOAD_TERMINATOR,
};
use ftm_protocol::{Command, OBJECT_INDEX, ProtocolVersion, RemoteError, crc16};
use ftm_transfer::{Transport, TransportError, TransportFuture};
use tracing::debug;

use crate::RecordedCall;

/// Frame ceiling used unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64;

const ROOT: &str = "/";

/// Misbehaviour to inject into a device exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail the invoke before the device sees the request.
    Error(TransportError),
    /// Drop the link. This and every later invoke fail until `reconnect`.
    Disconnect,
    /// Apply the request, then lose the response.
    LoseResponse,
    /// Apply the request and corrupt the last byte of the response.
    CorruptCrc,
    /// Answer with this status byte without applying the request.
    Status(u8),
}

/// When and how often a [`Fault`] fires.
#[derive(Debug, Clone)]
pub struct FaultRule {
    command: Command,
    fault: Fault,
    skip: usize,
    times: usize,
}

impl FaultRule {
    /// Fires once, on the next invoke of `command`.
    pub fn new(command: Command, fault: Fault) -> Self {
        Self {
            command,
            fault,
            skip: 0,
            times: 1,
        }
    }

    /// Lets `n` matching invokes pass untouched first.
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Fires on `n` consecutive matching invokes.
    pub fn times(mut self, n: usize) -> Self {
        self.times = n.max(1);
        self
    }
}

#[derive(Debug)]
enum Direction {
    Upload { data: Vec<u8> },
    Download { data: Vec<u8>, offset: usize },
}

#[derive(Debug)]
struct OpenTransfer {
    path: String,
    chunk_length: usize,
    direction: Direction,
    /// Last served sequence and its response, replayed for duplicates.
    last: Option<(u16, Vec<u8>)>,
    finished: bool,
}

impl OpenTransfer {
    fn is_upload(&self) -> bool {
        matches!(self.direction, Direction::Upload { .. })
    }
}

#[derive(Debug)]
struct DeviceState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    transfer: Option<OpenTransfer>,
    listing: Option<Vec<(u8, String)>>,
    version: ProtocolVersion,
    max_frame: usize,
    faults: Vec<FaultRule>,
    calls: Vec<RecordedCall>,
    connected: bool,
    reconnects: u32,
    refused_reconnects: u32,
}

/// A remote file system held in memory.
///
/// Implements [`Transport`] by decoding each request, applying it and
/// encoding the response exactly as the device firmware would. Repeated
/// chunks (same sequence as the last one) are answered again without being
/// applied twice, so lost responses can be recovered by retrying.
pub struct SimulatedDevice {
    state: Mutex<DeviceState>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert(ROOT.to_string());
        Self {
            state: Mutex::new(DeviceState {
                files: BTreeMap::new(),
                dirs,
                transfer: None,
                listing: None,
                version: ftm_transfer::LOCAL_VERSION,
                max_frame: DEFAULT_MAX_FRAME_LENGTH,
                faults: Vec::new(),
                calls: Vec::new(),
                connected: true,
                reconnects: 0,
                refused_reconnects: 0,
            }),
        }
    }

    pub fn with_max_frame_length(self, max_frame: usize) -> Self {
        self.lock().max_frame = max_frame;
        self
    }

    pub fn with_version(self, version: ProtocolVersion) -> Self {
        self.lock().version = version;
        self
    }

    /// Seeds a file, creating missing parent directories.
    pub fn with_file(self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        {
            let mut state = self.lock();
            let path = normalize(path);
            state.create_parents(&path);
            state.files.insert(path, data.into());
        }
        self
    }

    /// Seeds a directory, creating missing parents.
    pub fn with_dir(self, path: &str) -> Self {
        {
            let mut state = self.lock();
            let path = normalize(path);
            state.create_parents(&path);
            state.dirs.insert(path);
        }
        self
    }

    pub fn set_max_frame_length(&self, max_frame: usize) {
        self.lock().max_frame = max_frame;
    }

    pub fn inject(&self, rule: FaultRule) {
        self.lock().faults.push(rule);
    }

    /// Makes the next `n` reconnect attempts fail.
    pub fn refuse_reconnects(&self, n: u32) {
        self.lock().refused_reconnects = n;
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize(path)).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(&normalize(path))
    }

    /// Returns `true` while an upload or download is open and unfinished.
    pub fn has_open_transfer(&self) -> bool {
        self.lock().transfer.as_ref().is_some_and(|t| !t.finished)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of invokes of `command` seen so far.
    pub fn count(&self, command: Command) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.command == command.code())
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn reconnects(&self) -> u32 {
        self.lock().reconnects
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(
        &self,
        object_index: u8,
        command: u8,
        payload: Option<&[u8]>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            object_index,
            command,
            payload: payload.map(<[u8]>::to_vec),
        });

        if !state.connected {
            return Err(TransportError::Disconnected("device offline".into()));
        }
        if object_index != OBJECT_INDEX {
            return Err(TransportError::Other(format!(
                "no function property on object {object_index}"
            )));
        }
        let frame_len = payload.map_or(0, <[u8]>::len);
        if frame_len + FRAME_OVERHEAD > state.max_frame {
            return Err(TransportError::Other(format!(
                "frame of {frame_len} bytes exceeds maximum of {}",
                state.max_frame
            )));
        }
        let cmd = Command::from_code(command)
            .ok_or_else(|| TransportError::Other(format!("unsupported command {command}")))?;

        let fault = state.take_fault(cmd);
        match &fault {
            Some(Fault::Error(e)) => return Err(e.clone()),
            Some(Fault::Disconnect) => {
                state.connected = false;
                return Err(TransportError::Disconnected("link dropped".into()));
            }
            Some(Fault::Status(code)) => return Ok(vec![*code]),
            _ => {}
        }

        let mut response = state.apply(cmd, payload.unwrap_or(&[]))?;
        debug!(command = %cmd, response_len = response.len(), "device answered");
        match fault {
            Some(Fault::LoseResponse) => Err(TransportError::Timeout),
            Some(Fault::CorruptCrc) => {
                if let Some(last) = response.last_mut() {
                    *last ^= 0xFF;
                }
                Ok(response)
            }
            _ => Ok(response),
        }
    }
}

impl Transport for SimulatedDevice {
    fn invoke<'a>(
        &'a self,
        object_index: u8,
        command: u8,
        payload: Option<&'a [u8]>,
        _wait_for_response: bool,
    ) -> TransportFuture<'a, Vec<u8>> {
        let result = self.handle(object_index, command, payload);
        Box::pin(async move { result })
    }

    fn max_frame_length(&self) -> usize {
        self.lock().max_frame
    }

    fn reconnect(&self) -> TransportFuture<'_, ()> {
        let result = {
            let mut state = self.lock();
            state.reconnects += 1;
            if state.refused_reconnects > 0 {
                state.refused_reconnects -= 1;
                Err(TransportError::Disconnected("reconnect refused".into()))
            } else {
                state.connected = true;
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

fn ok() -> Vec<u8> {
    vec![STATUS_OK]
}

fn rejected(err: RemoteError) -> Vec<u8> {
    vec![err.code()]
}

fn malformed(what: &str) -> TransportError {
    TransportError::Other(format!("malformed {what} request"))
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(i) => &path[..i],
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn read_path(bytes: &[u8], what: &str) -> Result<(String, usize), TransportError> {
    let (path, rest) = decode_path(bytes).map_err(|_| malformed(what))?;
    Ok((normalize(&path), bytes.len() - rest.len()))
}

impl DeviceState {
    fn take_fault(&mut self, command: Command) -> Option<Fault> {
        let idx = self.faults.iter().position(|r| r.command == command)?;
        let rule = &mut self.faults[idx];
        if rule.skip > 0 {
            rule.skip -= 1;
            return None;
        }
        let fault = rule.fault.clone();
        rule.times -= 1;
        if rule.times == 0 {
            self.faults.remove(idx);
        }
        Some(fault)
    }

    fn create_parents(&mut self, path: &str) {
        let mut dir = parent(path);
        while dir != ROOT {
            self.dirs.insert(dir.to_string());
            dir = parent(dir);
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn apply(&mut self, command: Command, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        match command {
            Command::Format => {
                self.files.clear();
                self.dirs.retain(|d| d == ROOT);
                self.transfer = None;
                self.listing = None;
                Ok(ok())
            }
            Command::Exists => {
                let (path, _) = read_path(payload, "exists")?;
                Ok(vec![STATUS_OK, u8::from(self.exists(&path))])
            }
            Command::Rename => {
                let (from, used) = read_path(payload, "rename")?;
                let (to, _) = read_path(&payload[used..], "rename")?;
                Ok(self.rename(&from, to))
            }
            Command::FileDelete => {
                let (path, _) = read_path(payload, "delete")?;
                Ok(match self.files.remove(&path) {
                    Some(_) => ok(),
                    None => rejected(RemoteError::FileDeleteFailed),
                })
            }
            Command::FileInfo => {
                let (path, _) = read_path(payload, "info")?;
                Ok(match self.files.get(&path) {
                    Some(data) => {
                        let mut resp = ok();
                        resp.extend_from_slice(&(data.len() as u32).to_be_bytes());
                        resp.extend_from_slice(&[0x00, 0x00]);
                        resp.extend_from_slice(&crc16(data).to_be_bytes());
                        resp
                    }
                    None => rejected(RemoteError::FileOpenFailed),
                })
            }
            Command::FileUpload => {
                let active = self
                    .transfer
                    .as_ref()
                    .is_some_and(|t| t.is_upload() && !t.finished);
                if active {
                    self.upload_chunk(payload)
                } else if payload == UPLOAD_TERMINATOR {
                    let closed = self
                        .transfer
                        .as_ref()
                        .is_some_and(|t| t.is_upload() && t.finished);
                    Ok(if closed {
                        ok()
                    } else {
                        rejected(RemoteError::FileNotOpened)
                    })
                } else {
                    self.open_transfer(command, payload)
                }
            }
            Command::FileDownload => {
                if payload.len() == 2 {
                    Ok(self.download_chunk(u16::from_le_bytes([payload[0], payload[1]])))
                } else {
                    self.open_transfer(command, payload)
                }
            }
            Command::DirList => {
                if payload.is_empty() {
                    Ok(self.next_listing_entry())
                } else {
                    let (path, _) = read_path(payload, "list")?;
                    Ok(self.start_listing(&path))
                }
            }
            Command::DirCreate => {
                let (path, _) = read_path(payload, "mkdir")?;
                Ok(if self.exists(&path) || !self.dirs.contains(parent(&path)) {
                    rejected(RemoteError::DirCreateFailed)
                } else {
                    self.dirs.insert(path);
                    ok()
                })
            }
            Command::DirDelete => {
                let (path, _) = read_path(payload, "rmdir")?;
                let has_children = self.files.keys().any(|f| parent(f) == path)
                    || self.dirs.iter().any(|d| d != ROOT && parent(d) == path);
                Ok(if path == ROOT || !self.dirs.contains(&path) || has_children {
                    rejected(RemoteError::DirDeleteFailed)
                } else {
                    self.dirs.remove(&path);
                    ok()
                })
            }
            Command::Cancel => {
                if let Some(t) = self.transfer.take() {
                    debug!(path = %t.path, "transfer aborted");
                }
                Ok(ok())
            }
            Command::GetVersion => {
                let mut resp = Vec::with_capacity(6);
                resp.extend_from_slice(&self.version.major.to_be_bytes());
                resp.extend_from_slice(&self.version.minor.to_be_bytes());
                resp.extend_from_slice(&self.version.build.to_be_bytes());
                Ok(resp)
            }
        }
    }

    fn rename(&mut self, from: &str, to: String) -> Vec<u8> {
        if self.exists(&to) || !self.dirs.contains(parent(&to)) {
            return rejected(RemoteError::FileRenameFailed);
        }
        match self.files.remove(from) {
            Some(data) => {
                self.files.insert(to, data);
                ok()
            }
            None => rejected(RemoteError::FileRenameFailed),
        }
    }

    fn open_transfer(&mut self, command: Command, header: &[u8]) -> Result<Vec<u8>, TransportError> {
        if header.len() < 4 || header[..2] != [0x00, 0x00] {
            return Err(malformed("transfer header"));
        }
        let chunk_length = usize::from(header[2]);
        let (path, _) = read_path(&header[3..], "transfer header")?;

        if self.transfer.as_ref().is_some_and(|t| !t.finished) {
            return Ok(rejected(RemoteError::FileAlreadyOpen));
        }
        if chunk_length + FRAME_OVERHEAD > self.max_frame {
            return Ok(rejected(RemoteError::ChunkTooLarge));
        }

        let (direction, response) = if command == Command::FileUpload {
            if self.dirs.contains(&path) || !self.dirs.contains(parent(&path)) {
                return Ok(rejected(RemoteError::FileOpenFailed));
            }
            (Direction::Upload { data: Vec::new() }, ok())
        } else {
            if chunk_length <= DOWNLOAD_CHUNK_OVERHEAD {
                return Ok(rejected(RemoteError::ChunkTooLarge));
            }
            let Some(data) = self.files.get(&path).cloned() else {
                return Ok(rejected(RemoteError::FileOpenFailed));
            };
            let mut resp = ok();
            resp.extend_from_slice(&(data.len() as u32).to_le_bytes());
            (Direction::Download { data, offset: 0 }, resp)
        };

        debug!(path = %path, chunk_length, command = %command, "transfer opened");
        self.transfer = Some(OpenTransfer {
            path,
            chunk_length,
            direction,
            last: None,
            finished: false,
        });
        Ok(response)
    }

    fn upload_chunk(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        let Some(t) = self.transfer.as_mut() else {
            return Ok(rejected(RemoteError::FileNotOpened));
        };
        let Direction::Upload { data } = &mut t.direction else {
            return Ok(rejected(RemoteError::FileNotOpened));
        };

        if frame == UPLOAD_TERMINATOR {
            let content = std::mem::take(data);
            t.finished = true;
            debug!(path = %t.path, bytes = content.len(), "upload stored");
            self.files.insert(t.path.clone(), content);
            return Ok(ok());
        }

        if frame.len() < 3 {
            return Err(malformed("upload chunk"));
        }
        if frame.len() > t.chunk_length {
            return Ok(rejected(RemoteError::ChunkTooLarge));
        }
        let sequence = u16::from_le_bytes([frame[0], frame[1]]);
        let payload = &frame[3..];
        if payload.len() != usize::from(frame[2]) {
            return Ok(rejected(RemoteError::IncompleteWrite));
        }

        if let Some((last_seq, ack)) = &t.last {
            if *last_seq == sequence {
                return Ok(ack.clone());
            }
            if sequence != last_seq.wrapping_add(1) {
                return Ok(rejected(RemoteError::FileSeekFailed));
            }
        }

        data.extend_from_slice(payload);
        let mut ack = ok();
        ack.extend_from_slice(&sequence.to_le_bytes());
        ack.extend_from_slice(&crc16(frame).to_be_bytes());
        t.last = Some((sequence, ack.clone()));
        Ok(ack)
    }

    fn download_chunk(&mut self, sequence: u16) -> Vec<u8> {
        let Some(t) = self.transfer.as_mut() else {
            return rejected(RemoteError::FileNotOpened);
        };
        let Direction::Download { data, offset } = &mut t.direction else {
            return rejected(RemoteError::FileNotOpened);
        };

        if let Some((last_seq, response)) = &t.last {
            if *last_seq == sequence {
                return response.clone();
            }
            if sequence != last_seq.wrapping_add(1) {
                return rejected(RemoteError::FileSeekFailed);
            }
        }
        if t.finished {
            return rejected(RemoteError::FileNotOpened);
        }

        let capacity = t.chunk_length - DOWNLOAD_CHUNK_OVERHEAD;
        let n = capacity.min(data.len() - *offset);
        let mut resp = ok();
        resp.extend_from_slice(&sequence.to_le_bytes());
        resp.push(n as u8);
        resp.extend_from_slice(&data[*offset..*offset + n]);
        let crc = crc16(&resp[1..]);
        resp.extend_from_slice(&crc.to_be_bytes());
        *offset += n;

        if resp.len() < t.chunk_length {
            t.finished = true;
            debug!(path = %t.path, bytes = data.len(), "download served");
        }
        t.last = Some((sequence, resp.clone()));
        resp
    }

    fn start_listing(&mut self, path: &str) -> Vec<u8> {
        if !self.dirs.contains(path) {
            self.listing = None;
            return rejected(RemoteError::DirOpenFailed);
        }
        let mut entries: Vec<(u8, String)> = self
            .dirs
            .iter()
            .filter(|d| d.as_str() != ROOT && parent(d) == path)
            .map(|d| (ENTRY_DIR, file_name(d).to_string()))
            .chain(
                self.files
                    .keys()
                    .filter(|f| parent(f) == path)
                    .map(|f| (ENTRY_FILE, file_name(f).to_string())),
            )
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1));
        // Served back to front.
        entries.reverse();
        self.listing = Some(entries);
        self.next_listing_entry()
    }

    fn next_listing_entry(&mut self) -> Vec<u8> {
        let Some(entries) = self.listing.as_mut() else {
            return rejected(RemoteError::DirNotOpened);
        };
        match entries.pop() {
            Some((kind, name)) => {
                let mut resp = vec![STATUS_OK, kind];
                resp.extend(name.bytes().map(|b| if b.is_ascii() { b } else { b'?' }));
                resp
            }
            None => {
                self.listing = None;
                vec![STATUS_OK, ENTRY_END]
            }
        }
    }
}
