//! Transfer progress observation
//!
//! The fetcher reports the cumulative number of bytes written to the local
//! archive after every completed range. Observers are purely informational:
//! they cannot fail or pause the transfer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives cumulative byte counts during a fetch
///
/// Calls arrive on the fetching task, one at a time, with monotonically
/// increasing values. Implementations must return quickly.
pub trait ProgressObserver: Send + Sync {
    /// Called with the total number of bytes transferred so far
    fn on_progress(&self, bytes_transferred: u64);
}

/// Observer that ignores every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _bytes_transferred: u64) {}
}

/// Observer that emits an `info` event per update
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, bytes_transferred: u64) {
        tracing::info!(bytes = bytes_transferred, "Downloaded {} bytes", bytes_transferred);
    }
}

impl<F> ProgressObserver for F
where
    F: Fn(u64) + Send + Sync,
{
    fn on_progress(&self, bytes_transferred: u64) {
        self(bytes_transferred)
    }
}

/// Running byte counter that forwards totals to an optional observer
pub(crate) struct ProgressTracker {
    transferred: AtomicU64,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl ProgressTracker {
    pub(crate) fn new(observer: Option<Arc<dyn ProgressObserver>>) -> Self {
        Self {
            transferred: AtomicU64::new(0),
            observer,
        }
    }

    /// Record `bytes` more and notify the observer with the new total
    pub(crate) fn add(&self, bytes: u64) {
        let total = self.transferred.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if let Some(observer) = &self.observer {
            observer.on_progress(total);
        }
    }

    pub(crate) fn total(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn tracker_reports_cumulative_totals() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracker = ProgressTracker::new(Some(Arc::new(move |n: u64| {
            sink.lock().unwrap().push(n);
        })));

        tracker.add(10);
        tracker.add(5);
        tracker.add(7);

        assert_eq!(*seen.lock().unwrap(), vec![10, 15, 22]);
        assert_eq!(tracker.total(), 22);
    }

    #[test]
    fn tracker_without_observer_still_counts() {
        let tracker = ProgressTracker::new(None);
        tracker.add(3);
        tracker.add(4);
        assert_eq!(tracker.total(), 7);
    }

    #[test]
    fn builtin_observers_accept_updates() {
        NoopProgress.on_progress(1);
        LogProgress.on_progress(2);
    }
}
