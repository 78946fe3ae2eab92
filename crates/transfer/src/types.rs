use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::progress::{ProgressReport, SpeedCalculator};

/// Lifecycle of a single upload or download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Idle,
    HeaderSent,
    Streaming,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl TransferPhase {
    /// Returns `true` once the transfer can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferPhase::Completed | TransferPhase::Failed | TransferPhase::Cancelled
        )
    }
}

impl std::fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransferPhase::Idle => "idle",
            TransferPhase::HeaderSent => "header_sent",
            TransferPhase::Streaming => "streaming",
            TransferPhase::Finalizing => "finalizing",
            TransferPhase::Completed => "completed",
            TransferPhase::Failed => "failed",
            TransferPhase::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per-transfer knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferOptions {
    /// Frame size requested in the header. `None` picks the largest the
    /// transport allows.
    pub chunk_length: Option<u8>,
    /// The first chunk carries `start_sequence + 1`.
    pub start_sequence: u16,
}

impl TransferOptions {
    pub fn with_chunk_length(mut self, chunk_length: u8) -> Self {
        self.chunk_length = Some(chunk_length);
        self
    }

    pub fn with_start_sequence(mut self, start_sequence: u16) -> Self {
        self.start_sequence = start_sequence;
        self
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub bytes: u64,
    pub chunks: u64,
    /// Failed attempts across the whole transfer.
    pub retries: u32,
    pub elapsed: Duration,
}

impl TransferSummary {
    /// Average throughput, or `None` for an instantaneous transfer.
    pub fn bytes_per_second(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            Some(self.bytes as f64 / secs)
        } else {
            None
        }
    }
}

/// Mutable bookkeeping of one running transfer.
///
/// Created fresh for every upload or download and dropped when it ends.
#[derive(Debug, Clone)]
pub struct TransferState {
    /// Sequence number of the next chunk.
    pub sequence: u16,
    pub bytes_total: Option<u64>,
    pub bytes_done: u64,
    pub chunks: u64,
    pub retries: u32,
    started_at: Instant,
    last_chunk_at: Instant,
    rates: SpeedCalculator,
}

impl TransferState {
    pub fn new(first_sequence: u16, bytes_total: Option<u64>, speed_samples: usize) -> Self {
        let now = Instant::now();
        Self {
            sequence: first_sequence,
            bytes_total,
            bytes_done: 0,
            chunks: 0,
            retries: 0,
            started_at: now,
            last_chunk_at: now,
            rates: SpeedCalculator::new(speed_samples),
        }
    }

    /// Records an acknowledged chunk and advances the sequence.
    pub fn commit(&mut self, bytes: usize) -> ProgressReport {
        self.commit_at(bytes, Instant::now())
    }

    /// Like [`commit`](Self::commit) with an explicit clock reading.
    pub fn commit_at(&mut self, bytes: usize, now: Instant) -> ProgressReport {
        let sequence = self.sequence;
        let elapsed = now.saturating_duration_since(self.last_chunk_at);
        self.rates.add_sample(bytes as u64, elapsed);
        self.last_chunk_at = now;

        self.bytes_done += bytes as u64;
        self.chunks += 1;
        self.sequence = self.sequence.wrapping_add(1);

        ProgressReport {
            sequence,
            bytes_done: self.bytes_done,
            bytes_total: self.bytes_total,
            percent: self.percent(),
            rate: self.rates.bytes_per_second(),
            eta: self.eta(),
        }
    }

    /// `floor(done * 100 / total)`, capped at 100.
    pub fn percent(&self) -> Option<u8> {
        match self.bytes_total {
            Some(total) if total > 0 => {
                let pct = (self.bytes_done.saturating_mul(100) / total).min(100);
                Some(pct as u8)
            }
            _ => None,
        }
    }

    pub fn eta(&self) -> Option<Duration> {
        let total = self.bytes_total?;
        self.rates.eta(total.saturating_sub(self.bytes_done))
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            bytes: self.bytes_done,
            chunks: self.chunks,
            retries: self.retries,
            elapsed: self.elapsed(),
        }
    }
}
