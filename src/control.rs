//! Cooperative cancel/pause flags shared by every worker of a session

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared session control. Workers only consult it at checkpoints: before a
/// task starts, before each retry, and while waiting between attempts.
#[derive(Debug, Default)]
pub struct SessionControl {
    cancel: AtomicBool,
    pause: AtomicBool,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Honored by sequential dispatch only.
    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Sleeps for `total`, waking early if the session is canceled.
    /// Returns `false` when woken by cancellation.
    pub fn sleep_unless_canceled(&self, total: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.is_canceled() {
                return false;
            }
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining -= step;
        }
        !self.is_canceled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn flags_toggle() {
        let c = SessionControl::new();
        assert!(!c.is_canceled());
        assert!(!c.is_paused());
        c.pause();
        assert!(c.is_paused());
        c.resume();
        assert!(!c.is_paused());
        c.cancel();
        assert!(c.is_canceled());
    }

    #[test]
    fn sleep_wakes_on_cancel() {
        let c = Arc::new(SessionControl::new());
        let c2 = Arc::clone(&c);
        let start = Instant::now();
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            c2.cancel();
        });
        let completed = c.sleep_unless_canceled(Duration::from_secs(10));
        h.join().unwrap();
        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn sleep_runs_to_completion() {
        let c = SessionControl::new();
        assert!(c.sleep_unless_canceled(Duration::from_millis(10)));
        assert!(c.sleep_unless_canceled(Duration::ZERO));
    }
}
