use crate::TransferError;

/// Default number of invokes allowed per chunk.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Bounds how often a failed exchange is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per chunk, including the first. Never below 1.
    pub max_attempts: u32,
    /// Whether a connection loss triggers `Transport::reconnect`.
    pub reconnect: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            reconnect: true,
        }
    }

    pub fn without_reconnect(mut self) -> Self {
        self.reconnect = false;
        self
    }

    /// Returns `true` while `attempts` failures still leave room for another.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Result of one exchange attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Transient failure; the same frame may be sent again.
    Retry(TransferError),
    /// The device rejected the operation or the request is invalid.
    Fatal(TransferError),
}

impl<T> Attempt<T> {
    /// Sorts an exchange outcome using [`TransferError::is_retryable`].
    pub fn classify(result: Result<T, TransferError>) -> Self {
        match result {
            Ok(v) => Attempt::Done(v),
            Err(e) if e.is_retryable() => Attempt::Retry(e),
            Err(e) => Attempt::Fatal(e),
        }
    }
}
