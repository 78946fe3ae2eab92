use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use crate::types::TransferSummary;

/// Default number of throughput samples kept for smoothing.
pub const DEFAULT_SPEED_SAMPLES: usize = 20;

/// Smallest accepted smoothing window.
pub const MIN_SPEED_SAMPLES: usize = 5;

/// Callback invoked for every transfer event.
pub type EventCallback = Box<dyn Fn(&TransferEvent) + Send + Sync>;

/// Snapshot of a running transfer, emitted after each committed chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    /// Sequence number of the chunk just committed.
    pub sequence: u16,
    pub bytes_done: u64,
    /// Total size, once known.
    pub bytes_total: Option<u64>,
    /// `floor(bytes_done * 100 / bytes_total)`; `None` without a total.
    pub percent: Option<u8>,
    /// Smoothed throughput in bytes per second.
    pub rate: Option<f64>,
    /// Estimated time remaining, whole seconds.
    pub eta: Option<Duration>,
}

/// Notification delivered to transfer observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferEvent {
    /// A chunk was acknowledged and committed.
    Progress(ProgressReport),
    /// An exchange attempt failed and will be retried (or the budget ran out).
    Retry {
        sequence: u16,
        attempt: u32,
        error: String,
    },
    /// The transfer completed.
    Finished(TransferSummary),
}

/// Fans transfer events out to registered observers.
///
/// Observers are advisory: nothing they do affects the transfer.
#[derive(Default)]
pub struct ProgressTracker {
    callbacks: Vec<EventCallback>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub fn on_event(&mut self, callback: EventCallback) {
        self.callbacks.push(callback);
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Delivers `event` to every observer, in registration order.
    pub fn notify(&self, event: &TransferEvent) {
        for cb in &self.callbacks {
            cb(event);
        }
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("observers", &self.callbacks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

/// Smooths per-chunk throughput over a fixed-capacity ring buffer.
///
/// When full, the oldest sample is evicted on each push.
#[derive(Debug, Clone)]
pub struct SpeedCalculator {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SpeedCalculator {
    /// Creates a calculator keeping `capacity` samples, clamped to
    /// `MIN_SPEED_SAMPLES..=DEFAULT_SPEED_SAMPLES`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_SPEED_SAMPLES, DEFAULT_SPEED_SAMPLES);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records `bytes` moved over `elapsed`.
    ///
    /// Returns `false` (and records nothing) when `elapsed` is zero.
    pub fn add_sample(&mut self, bytes: u64, elapsed: Duration) -> bool {
        if elapsed.is_zero() {
            return false;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(bytes as f64 / elapsed.as_secs_f64());
        true
    }

    /// Mean of the retained samples, in bytes per second.
    pub fn bytes_per_second(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Estimated time to move `remaining_bytes`, floored to whole seconds.
    ///
    /// Returns `None` until a positive rate is known.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second()?;
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs((remaining_bytes as f64 / rate).floor() as u64))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_SAMPLES)
    }
}
