//! Thread-safe aggregation of per-file progress into session totals
//!
//! Many workers write, one consumer reads. A single lock guards the whole
//! aggregate so a snapshot never mixes two half-applied updates.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Number of speed samples kept for smoothing.
pub const SPEED_WINDOW: usize = 10;

/// Consistent copy of the aggregate state.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes of files that completed successfully. Never decreases.
    pub uploaded_bytes: u64,
    /// Interpolated bytes of files still in flight.
    pub in_flight_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
    /// Mean of the buffered speed samples, bytes per second.
    pub speed: f64,
    pub eta: Option<Duration>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Committed plus in-flight bytes.
    pub fn transferred_bytes(&self) -> u64 {
        self.uploaded_bytes + self.in_flight_bytes
    }
}

struct AggregateState {
    uploaded_bytes: u64,
    total_bytes: u64,
    in_flight: HashMap<usize, u64>,
    samples: VecDeque<f64>,
    started: Instant,
}

impl AggregateState {
    fn in_flight_sum(&self) -> u64 {
        self.in_flight.values().sum()
    }

    fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let done = self.uploaded_bytes + self.in_flight_sum();
        done as f64 / self.total_bytes as f64 * 100.0
    }

    fn speed(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    fn eta(&self) -> Option<Duration> {
        let done = self.uploaded_bytes + self.in_flight_sum();
        let speed = self.speed();
        if speed > 0.0 && self.total_bytes > 0 {
            let remaining = self.total_bytes.saturating_sub(done);
            return Some(Duration::from_secs_f64(remaining as f64 / speed));
        }
        // Linear extrapolation from elapsed time and percent
        let percent = self.percent();
        if percent <= 0.0 {
            return None;
        }
        if percent >= 100.0 {
            return Some(Duration::ZERO);
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        Some(Duration::from_secs_f64(elapsed * (100.0 - percent) / percent))
    }
}

/// Combines concurrent per-file updates into overall bytes, percent, speed and ETA.
pub struct ProgressAggregator {
    inner: Mutex<AggregateState>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AggregateState {
                uploaded_bytes: 0,
                total_bytes: 0,
                in_flight: HashMap::new(),
                samples: VecDeque::with_capacity(SPEED_WINDOW),
                started: Instant::now(),
            }),
        }
    }

    /// Fixes the session total and restarts the clock. Called once before dispatch.
    pub fn set_total(&self, total_bytes: u64) {
        let mut s = self.inner.lock();
        s.total_bytes = total_bytes;
        s.started = Instant::now();
    }

    /// Replaces the in-flight contribution of `task`; returns the new overall
    /// (transferred, total, percent) triple.
    pub fn update_in_flight(&self, task: usize, bytes_this_file: u64) -> (u64, u64, f64) {
        let mut s = self.inner.lock();
        s.in_flight.insert(task, bytes_this_file);
        let transferred = s.uploaded_bytes + s.in_flight_sum();
        (transferred, s.total_bytes, s.percent())
    }

    /// Drops a task's in-flight contribution (failed attempt or final failure).
    pub fn clear_in_flight(&self, task: usize) {
        self.inner.lock().in_flight.remove(&task);
    }

    /// Commits a finished file's true size, replacing its in-flight estimate.
    pub fn commit(&self, task: usize, file_size: u64) -> (u64, u64, f64) {
        let mut s = self.inner.lock();
        s.in_flight.remove(&task);
        s.uploaded_bytes += file_size;
        let transferred = s.uploaded_bytes + s.in_flight_sum();
        (transferred, s.total_bytes, s.percent())
    }

    /// Records one speed sample, evicting the oldest past [`SPEED_WINDOW`].
    pub fn record_speed(&self, bytes_per_sec: f64) {
        if !bytes_per_sec.is_finite() || bytes_per_sec < 0.0 {
            return;
        }
        let mut s = self.inner.lock();
        if s.samples.len() >= SPEED_WINDOW {
            s.samples.pop_front();
        }
        s.samples.push_back(bytes_per_sec);
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.inner.lock().uploaded_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    pub fn overall_percent(&self) -> f64 {
        self.inner.lock().percent()
    }

    pub fn smoothed_speed(&self) -> f64 {
        self.inner.lock().speed()
    }

    pub fn eta(&self) -> Option<Duration> {
        self.inner.lock().eta()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let s = self.inner.lock();
        ProgressSnapshot {
            uploaded_bytes: s.uploaded_bytes,
            in_flight_bytes: s.in_flight_sum(),
            total_bytes: s.total_bytes,
            percent: s.percent(),
            speed: s.speed(),
            eta: s.eta(),
            elapsed: s.started.elapsed(),
        }
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Human readable byte count (`1.5 MB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} PB")
}
