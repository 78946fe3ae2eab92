//! Chunked upload and download over a bounded-frame transport.
//!
//! A [`TransferSession`] runs exactly one transfer through the phases
//! `Idle -> HeaderSent -> Streaming -> Finalizing -> Completed`, ending in
//! `Failed` or `Cancelled` on the error paths. Every chunk is a single
//! exchange; chunk `n + 1` is never sent before chunk `n` is acknowledged.

use ftm_protocol::codec;
use ftm_protocol::constants::{
    DOWNLOAD_CHUNK_OVERHEAD, FRAME_OVERHEAD, MAX_CHUNK_LENGTH, UPLOAD_CHUNK_OVERHEAD,
    UPLOAD_TERMINATOR,
};
use ftm_protocol::{Command, OBJECT_INDEX, crc16};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::progress::{DEFAULT_SPEED_SAMPLES, ProgressTracker, TransferEvent};
use crate::retry::{Attempt, RetryPolicy};
use crate::transport::Transport;
use crate::types::{TransferOptions, TransferPhase, TransferState, TransferSummary};

/// Sequence reported in events about the upload terminator.
const TERMINATOR_SEQUENCE: u16 = u16::from_le_bytes(UPLOAD_TERMINATOR);

/// Drives one upload or download.
pub struct TransferSession<'a, T: Transport + ?Sized> {
    transport: &'a T,
    tracker: &'a ProgressTracker,
    policy: RetryPolicy,
    cancel: CancellationToken,
    speed_samples: usize,
    phase: TransferPhase,
    state: Option<TransferState>,
}

impl<'a, T: Transport + ?Sized> TransferSession<'a, T> {
    pub fn new(transport: &'a T, policy: RetryPolicy, tracker: &'a ProgressTracker) -> Self {
        Self {
            transport,
            tracker,
            policy,
            cancel: CancellationToken::new(),
            speed_samples: DEFAULT_SPEED_SAMPLES,
            phase: TransferPhase::Idle,
            state: None,
        }
    }

    /// Stops the transfer at the next chunk boundary once `token` fires.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sets the throughput smoothing window.
    pub fn with_speed_samples(mut self, samples: usize) -> Self {
        self.speed_samples = samples;
        self
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Bookkeeping of the transfer, once its header was acknowledged.
    pub fn state(&self) -> Option<&TransferState> {
        self.state.as_ref()
    }

    /// Uploads `length` bytes from `source` to `path` on the device.
    ///
    /// Reading stops after `length` bytes even if the source has more.
    pub async fn upload<R>(
        &mut self,
        path: &str,
        source: R,
        length: u64,
        options: &TransferOptions,
    ) -> Result<TransferSummary, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_idle()?;
        let result = self.run_upload(path, source, length, options).await;
        self.settle(path, result)
    }

    /// Downloads `path` from the device into `sink`.
    pub async fn download<W>(
        &mut self,
        path: &str,
        sink: W,
        options: &TransferOptions,
    ) -> Result<TransferSummary, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        self.ensure_idle()?;
        let result = self.run_download(path, sink, options).await;
        self.settle(path, result)
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    async fn run_upload<R>(
        &mut self,
        path: &str,
        source: R,
        length: u64,
        options: &TransferOptions,
    ) -> Result<TransferSummary, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let (chunk_length, header) =
            self.encode_header(path, options.chunk_length, UPLOAD_CHUNK_OVERHEAD)?;

        debug!(
            path = %path,
            chunk_length,
            length,
            observers = self.tracker.observer_count(),
            "starting upload"
        );
        let response = self.send_header(Command::FileUpload, &header).await?;
        codec::check_status(&response)?;

        let mut state = TransferState::new(
            options.start_sequence.wrapping_add(1),
            Some(length),
            self.speed_samples,
        );
        self.set_phase(TransferPhase::Streaming);
        let result = self
            .stream_upload(&mut state, source.take(length), chunk_length)
            .await;
        if result.is_ok() && state.bytes_done < length {
            warn!(
                path = %path,
                declared = length,
                sent = state.bytes_done,
                "source ended before the declared length"
            );
        }
        let summary = state.summary();
        self.state = Some(state);
        result.map(|()| summary)
    }

    async fn stream_upload<R>(
        &mut self,
        state: &mut TransferState,
        mut source: R,
        chunk_length: u8,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; chunk_length as usize - UPLOAD_CHUNK_OVERHEAD];
        loop {
            self.check_cancelled().await?;

            let n = read_full(&mut source, &mut buf).await?;
            if n == 0 {
                break;
            }

            let sequence = state.sequence;
            let frame = codec::encode_upload_chunk(sequence, &buf[..n])?;
            let expected = crc16(&frame);
            self.exchange(state, Command::FileUpload, &frame, sequence, |response| {
                let ack = codec::decode_upload_ack(response)?;
                if ack.sequence != sequence {
                    return Err(TransferError::SequenceMismatch {
                        sent: sequence,
                        acked: ack.sequence,
                    });
                }
                if ack.crc != expected {
                    return Err(TransferError::ChecksumMismatch {
                        expected,
                        actual: ack.crc,
                    });
                }
                Ok(())
            })
            .await?;

            let report = state.commit(n);
            debug!(sequence, bytes = n, "chunk acknowledged");
            self.tracker.notify(&TransferEvent::Progress(report));
        }

        self.set_phase(TransferPhase::Finalizing);
        self.exchange(
            state,
            Command::FileUpload,
            &UPLOAD_TERMINATOR,
            TERMINATOR_SEQUENCE,
            |response| Ok(codec::check_status(response)?),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    async fn run_download<W>(
        &mut self,
        path: &str,
        sink: W,
        options: &TransferOptions,
    ) -> Result<TransferSummary, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let (chunk_length, header) =
            self.encode_header(path, options.chunk_length, DOWNLOAD_CHUNK_OVERHEAD)?;

        debug!(
            path = %path,
            chunk_length,
            observers = self.tracker.observer_count(),
            "starting download"
        );
        let response = self.send_header(Command::FileDownload, &header).await?;
        let total = codec::decode_download_header(&response)?;
        debug!(path = %path, total, "download size announced");

        let mut state = TransferState::new(
            options.start_sequence.wrapping_add(1),
            Some(u64::from(total)),
            self.speed_samples,
        );
        self.set_phase(TransferPhase::Streaming);
        let result = self.stream_download(&mut state, sink, chunk_length).await;
        let summary = state.summary();
        self.state = Some(state);
        result.map(|()| summary)
    }

    async fn stream_download<W>(
        &mut self,
        state: &mut TransferState,
        mut sink: W,
        chunk_length: u8,
    ) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            self.check_cancelled().await?;

            let sequence = state.sequence;
            let request = codec::encode_download_request(sequence);
            let (payload, response_len) = self
                .exchange(state, Command::FileDownload, &request, sequence, |response| {
                    let chunk = codec::decode_download_chunk(response)?;
                    if chunk.sequence != sequence {
                        return Err(TransferError::SequenceMismatch {
                            sent: sequence,
                            acked: chunk.sequence,
                        });
                    }
                    if !chunk.crc_ok() {
                        return Err(TransferError::ChecksumMismatch {
                            expected: chunk.computed_crc,
                            actual: chunk.crc,
                        });
                    }
                    Ok((chunk.payload.to_vec(), response.len()))
                })
                .await?;

            sink.write_all(&payload).await?;
            sink.flush().await?;

            let report = state.commit(payload.len());
            debug!(sequence, bytes = payload.len(), "chunk received");
            self.tracker.notify(&TransferEvent::Progress(report));

            if response_len < usize::from(chunk_length) {
                break;
            }
        }
        self.set_phase(TransferPhase::Finalizing);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Exchange helpers
    // -----------------------------------------------------------------------

    /// Sends `frame` until `check` accepts the response or the retry budget
    /// runs out.
    ///
    /// The same frame is re-sent on every attempt. A failed reconnect
    /// consumes an attempt.
    async fn exchange<V>(
        &self,
        state: &mut TransferState,
        command: Command,
        frame: &[u8],
        sequence: u16,
        check: impl Fn(&[u8]) -> Result<V, TransferError>,
    ) -> Result<V, TransferError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = match self
                .transport
                .invoke(OBJECT_INDEX, command.code(), Some(frame), true)
                .await
            {
                Ok(response) => Attempt::classify(check(&response)),
                Err(e) => Attempt::classify(Err(e.into())),
            };

            let err = match outcome {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(err) => err,
            };

            state.retries += 1;
            warn!(command = %command, sequence, attempt = attempts, error = %err, "exchange failed");
            self.tracker.notify(&TransferEvent::Retry {
                sequence,
                attempt: attempts,
                error: err.to_string(),
            });
            if !self.policy.allows_another(attempts) {
                return Err(TransferError::TooManyErrors {
                    attempts,
                    last: Box::new(err),
                });
            }

            if self.policy.reconnect && err.is_connection_loss() {
                match self.transport.reconnect().await {
                    Ok(()) => debug!(sequence, "transport reconnected"),
                    Err(e) => {
                        attempts += 1;
                        state.retries += 1;
                        warn!(sequence, attempt = attempts, error = %e, "reconnect failed");
                        if !self.policy.allows_another(attempts) {
                            return Err(TransferError::TooManyErrors {
                                attempts,
                                last: Box::new(e.into()),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Opens the transfer. Never retried: a repeated open would find the
    /// file already open.
    async fn send_header(
        &mut self,
        command: Command,
        header: &[u8],
    ) -> Result<Vec<u8>, TransferError> {
        self.set_phase(TransferPhase::HeaderSent);
        let response = self
            .transport
            .invoke(OBJECT_INDEX, command.code(), Some(header), true)
            .await?;
        Ok(response)
    }

    async fn check_cancelled(&self) -> Result<(), TransferError> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        debug!("cancellation requested, notifying device");
        match self
            .transport
            .invoke(OBJECT_INDEX, Command::Cancel.code(), None, true)
            .await
        {
            Ok(response) => {
                if let Err(e) = codec::check_status(&response) {
                    warn!(error = %e, "device rejected cancel");
                }
            }
            Err(e) => warn!(error = %e, "failed to send cancel"),
        }
        Err(TransferError::Cancelled)
    }

    /// Encodes the transfer header. An oversized path is reported before an
    /// unusable chunk length, since the header size does not depend on it.
    fn encode_header(
        &self,
        path: &str,
        requested: Option<u8>,
        overhead: usize,
    ) -> Result<(u8, Vec<u8>), TransferError> {
        let max_frame = self.transport.max_frame_length();
        codec::encode_transfer_header(0, path, max_frame)?;
        let chunk_length = self.resolve_chunk_length(requested, overhead)?;
        let header = codec::encode_transfer_header(chunk_length, path, max_frame)?;
        Ok((chunk_length, header))
    }

    fn resolve_chunk_length(
        &self,
        requested: Option<u8>,
        overhead: usize,
    ) -> Result<u8, TransferError> {
        let max = self
            .transport
            .max_frame_length()
            .saturating_sub(FRAME_OVERHEAD)
            .min(MAX_CHUNK_LENGTH);
        let min = overhead + 1;
        let length = requested.map_or(max, usize::from);
        match u8::try_from(length) {
            Ok(len) if length >= min && length <= max => Ok(len),
            _ => Err(TransferError::InvalidChunkLength { length, min, max }),
        }
    }

    fn ensure_idle(&self) -> Result<(), TransferError> {
        if self.phase == TransferPhase::Idle {
            Ok(())
        } else {
            Err(TransferError::InvalidState(self.phase))
        }
    }

    fn set_phase(&mut self, next: TransferPhase) {
        debug_assert!(
            !self.phase.is_terminal(),
            "transition out of terminal phase {}",
            self.phase
        );
        debug!(from = %self.phase, to = %next, "transfer phase");
        self.phase = next;
    }

    fn settle(
        &mut self,
        path: &str,
        result: Result<TransferSummary, TransferError>,
    ) -> Result<TransferSummary, TransferError> {
        match &result {
            Ok(summary) => {
                self.set_phase(TransferPhase::Completed);
                info!(
                    path = %path,
                    bytes = summary.bytes,
                    chunks = summary.chunks,
                    retries = summary.retries,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    rate = summary.bytes_per_second().unwrap_or(0.0),
                    "transfer complete"
                );
                self.tracker.notify(&TransferEvent::Finished(*summary));
            }
            Err(TransferError::Cancelled) => self.set_phase(TransferPhase::Cancelled),
            Err(e) => {
                warn!(path = %path, phase = %self.phase, error = %e, "transfer failed");
                self.set_phase(TransferPhase::Failed);
            }
        }
        result
    }
}

/// Reads until `buf` is full or the source is exhausted.
async fn read_full<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
