use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ftm_protocol::Command;
use ftm_transfer::{Transport, TransportError, TransportFuture};

use crate::RecordedCall;

/// Answers invokes from a queue of canned responses.
///
/// Useful for device behaviour [`SimulatedDevice`](crate::SimulatedDevice)
/// never produces, like unknown listing kinds or raw status codes.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    max_frame: usize,
}

impl ScriptedTransport {
    pub fn new(max_frame: usize) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            max_frame,
        }
    }

    /// Queues a response.
    pub fn push(&self, response: impl Into<Vec<u8>>) -> &Self {
        lock(&self.responses).push_back(Ok(response.into()));
        self
    }

    /// Queues a transport failure.
    pub fn push_error(&self, err: TransportError) -> &Self {
        lock(&self.responses).push_back(Err(err));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, command: Command) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.command == command.code())
            .count()
    }

    /// Responses not consumed yet.
    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport for ScriptedTransport {
    fn invoke<'a>(
        &'a self,
        object_index: u8,
        command: u8,
        payload: Option<&'a [u8]>,
        _wait_for_response: bool,
    ) -> TransportFuture<'a, Vec<u8>> {
        lock(&self.calls).push(RecordedCall {
            object_index,
            command,
            payload: payload.map(<[u8]>::to_vec),
        });
        let next = lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("no scripted response left".into())));
        Box::pin(async move { next })
    }

    fn max_frame_length(&self) -> usize {
        self.max_frame
    }

    fn reconnect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
