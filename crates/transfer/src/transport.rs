//! The request/response channel the engine drives.
//!
//! Establishing the session, moving bytes and reconnecting are the
//! transport's business; the engine only needs one exchange at a time.

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The link to the device dropped; a reconnect may recover it.
    #[error("device not connected: {0}")]
    Disconnected(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if the error signals a lost connection.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, TransportError::Disconnected(_))
    }
}

/// Abstract request/response channel to the remote device.
///
/// Implementations must answer one [`invoke`](Transport::invoke) before the
/// next is issued; the engine never pipelines requests.
pub trait Transport: Send + Sync {
    /// Sends one command and, if `wait_for_response` is set, returns the
    /// response bytes (status byte first).
    fn invoke<'a>(
        &'a self,
        object_index: u8,
        command: u8,
        payload: Option<&'a [u8]>,
        wait_for_response: bool,
    ) -> TransportFuture<'a, Vec<u8>>;

    /// Current ceiling on the payload size of a single exchange.
    fn max_frame_length(&self) -> usize;

    /// Re-establishes the link after a disconnect.
    fn reconnect(&self) -> TransportFuture<'_, ()>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn invoke<'a>(
        &'a self,
        object_index: u8,
        command: u8,
        payload: Option<&'a [u8]>,
        wait_for_response: bool,
    ) -> TransportFuture<'a, Vec<u8>> {
        (**self).invoke(object_index, command, payload, wait_for_response)
    }

    fn max_frame_length(&self) -> usize {
        (**self).max_frame_length()
    }

    fn reconnect(&self) -> TransportFuture<'_, ()> {
        (**self).reconnect()
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn invoke<'a>(
        &'a self,
        object_index: u8,
        command: u8,
        payload: Option<&'a [u8]>,
        wait_for_response: bool,
    ) -> TransportFuture<'a, Vec<u8>> {
        (**self).invoke(object_index, command, payload, wait_for_response)
    }

    fn max_frame_length(&self) -> usize {
        (**self).max_frame_length()
    }

    fn reconnect(&self) -> TransportFuture<'_, ()> {
        (**self).reconnect()
    }
}
