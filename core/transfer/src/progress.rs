//! Per-item progress reporting.

use tracing::info;

/// Receives progress for one transfer.
///
/// Called from the transfer task between remote calls, so implementations
/// should return quickly.
pub trait ProgressSink: Send + Sync {
    /// The transfer is about to start `total` items.
    fn start(&self, total: usize);

    /// One item was attempted; `completed` counts attempts so far.
    fn item_done(&self, completed: usize, total: usize, name: &str);
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _total: usize) {}

    fn item_done(&self, _completed: usize, _total: usize, _name: &str) {}
}

/// Reports progress through the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn start(&self, total: usize) {
        info!("Uploading {} item(s)", total);
    }

    fn item_done(&self, completed: usize, total: usize, name: &str) {
        info!("[{}/{}] {}", completed, total, name);
    }
}
