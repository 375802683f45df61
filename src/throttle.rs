//! Per-connection bandwidth throttling
//!
//! Each connection owns its own throttle. There is no coordination between
//! connections, so N workers at limit L can push up to N * L in aggregate.

use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Paces cumulative bytes to a configured rate.
#[derive(Debug)]
pub struct BandwidthThrottle {
    limit_bps: u64,
    start: Instant,
    sent: u64,
}

impl BandwidthThrottle {
    /// `limit_bps` is bytes per second, 0 disables throttling.
    pub fn new(limit_bps: u64) -> Self {
        Self {
            limit_bps,
            start: Instant::now(),
            sent: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Total bytes accounted since the connection started.
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// How long the caller must wait after delivering `bytes` more bytes.
    fn required_delay(&mut self, bytes: u64) -> Option<Duration> {
        if self.limit_bps == 0 {
            return None;
        }
        self.sent += bytes;
        let expected = self.sent as f64 / self.limit_bps as f64;
        let actual = self.start.elapsed().as_secs_f64();
        if actual < expected {
            Some(Duration::from_secs_f64(expected - actual))
        } else {
            None
        }
    }

    /// Accounts for a delivered chunk and blocks until the cap is respected.
    pub fn throttle(&mut self, bytes: usize) {
        if let Some(delay) = self.required_delay(bytes as u64) {
            std::thread::sleep(delay);
        }
    }
}

/// Throttle shared between an adapter and the readers it hands to a client
/// library that needs an owned `'static` body.
pub type SharedThrottle = Arc<Mutex<BandwidthThrottle>>;

pub fn shared(limit_bps: u64) -> SharedThrottle {
    Arc::new(Mutex::new(BandwidthThrottle::new(limit_bps)))
}

/// `Read` wrapper that throttles every chunk and optionally reports percent.
///
/// Progress is reported from whichever thread calls `read`. Adapters only
/// attach a progress callback when the read loop runs on the calling thread.
pub struct ThrottledReader<'a, R> {
    inner: R,
    throttle: SharedThrottle,
    total: u64,
    transferred: u64,
    progress: Option<&'a mut dyn FnMut(f64)>,
}

impl<'a, R: Read> ThrottledReader<'a, R> {
    pub fn new(inner: R, throttle: SharedThrottle, total: u64) -> Self {
        Self {
            inner,
            throttle,
            total,
            transferred: 0,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a mut dyn FnMut(f64)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

impl<R: Read> Read for ThrottledReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            return Ok(0);
        }
        self.transferred += n as u64;
        // Compute the wait under the lock, sleep outside it
        let delay = self.throttle.lock().required_delay(n as u64);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(cb) = self.progress.as_mut() {
            let percent = if self.total > 0 {
                (self.transferred as f64 / self.total as f64 * 100.0).min(100.0)
            } else {
                100.0
            };
            cb(percent);
        }
        Ok(n)
    }
}

/// Owned variant for client libraries that require `Read + Send + 'static`.
pub struct OwnedThrottledReader<R> {
    inner: R,
    throttle: SharedThrottle,
}

impl<R: Read> OwnedThrottledReader<R> {
    pub fn new(inner: R, throttle: SharedThrottle) -> Self {
        Self { inner, throttle }
    }
}

impl<R: Read> Read for OwnedThrottledReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            let delay = self.throttle.lock().required_delay(n as u64);
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
        }
        Ok(n)
    }
}
