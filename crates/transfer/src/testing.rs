//! Scripted transport double for unit tests.
//!
//! `ftm-test-utils` depends on this crate, so its `ScriptedTransport` is only
//! reachable from the integration tests under `tests/`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ftm_protocol::crc16;

use crate::transport::{Transport, TransportError, TransportFuture};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub object_index: u8,
    pub command: u8,
    pub payload: Option<Vec<u8>>,
}

pub(crate) struct MockTransport {
    responses: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    calls: Mutex<Vec<Call>>,
    reconnects: AtomicU32,
    fail_reconnect: AtomicBool,
    max_frame: usize,
}

impl MockTransport {
    pub fn new(max_frame: usize) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            reconnects: AtomicU32::new(0),
            fail_reconnect: AtomicBool::new(false),
            max_frame,
        }
    }

    pub fn respond(&self, response: Vec<u8>) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn fail(&self, err: TransportError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn fail_reconnects(&self) {
        self.fail_reconnect.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, command: u8) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn invoke<'a>(
        &'a self,
        object_index: u8,
        command: u8,
        payload: Option<&'a [u8]>,
        _wait_for_response: bool,
    ) -> TransportFuture<'a, Vec<u8>> {
        self.calls.lock().unwrap().push(Call {
            object_index,
            command,
            payload: payload.map(<[u8]>::to_vec),
        });
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("no scripted response".into())));
        Box::pin(async move { next })
    }

    fn max_frame_length(&self) -> usize {
        self.max_frame
    }

    fn reconnect(&self) -> TransportFuture<'_, ()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_reconnect.load(Ordering::SeqCst);
        Box::pin(async move {
            if fail {
                Err(TransportError::Disconnected("still down".into()))
            } else {
                Ok(())
            }
        })
    }
}

/// Builds the acknowledgement a device sends for an upload frame.
pub(crate) fn upload_ack(frame: &[u8]) -> Vec<u8> {
    let mut ack = vec![0x00, frame[0], frame[1]];
    ack.extend_from_slice(&crc16(frame).to_be_bytes());
    ack
}

/// Builds a download chunk response with a valid checksum.
pub(crate) fn download_chunk(sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut resp = vec![0x00];
    resp.extend_from_slice(&sequence.to_le_bytes());
    resp.push(payload.len() as u8);
    resp.extend_from_slice(payload);
    let crc = crc16(&resp[1..]);
    resp.extend_from_slice(&crc.to_be_bytes());
    resp
}

pub(crate) fn download_header(size: u32) -> Vec<u8> {
    let mut resp = vec![0x00];
    resp.extend_from_slice(&size.to_le_bytes());
    resp
}
