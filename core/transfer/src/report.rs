//! The externally visible outcome of a run.

use serde::Serialize;
use std::fmt;

use driveup_common::{Error, UploadResult};

use crate::executor::{StopReason, TransferReport};

/// Final state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// At least one item uploaded.
    Success { uploaded: usize },
    /// Nothing to upload.
    Empty,
    /// Stopped by the cancellation gate.
    Cancelled { point: String, completed: usize },
    /// The run failed; partial results may still be attached.
    Failed { cause: String },
}

/// Status plus the results gathered, whatever happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    status: RunStatus,
    results: Vec<UploadResult>,
}

impl RunSummary {
    /// Summarize a finished transfer.
    pub fn from_report(report: &TransferReport) -> Self {
        let results = report.results();
        let status = match report.stopped() {
            Some(StopReason::Cancelled(point)) => RunStatus::Cancelled {
                point: point.clone(),
                completed: results.len(),
            },
            Some(StopReason::Aborted(cause)) => RunStatus::Failed {
                cause: cause.clone(),
            },
            None if !results.is_empty() => RunStatus::Success {
                uploaded: results.len(),
            },
            None => match report.failures().last() {
                Some((name, error)) => RunStatus::Failed {
                    cause: format!(
                        "all {} file(s) failed, last: {} ({})",
                        report.failures().len(),
                        name,
                        error
                    ),
                },
                None => RunStatus::Empty,
            },
        };

        Self { status, results }
    }

    /// Summarize a run that ended with an error before or instead of a report.
    pub fn from_error(err: &Error) -> Self {
        let status = match err {
            Error::Cancelled(point) => RunStatus::Cancelled {
                point: point.clone(),
                completed: 0,
            },
            other => RunStatus::Failed {
                cause: other.to_string(),
            },
        };

        Self {
            status,
            results: Vec::new(),
        }
    }

    /// Final state.
    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Every completed upload in order, including those without a link.
    pub fn results(&self) -> &[UploadResult] {
        &self.results
    }

    /// Whether the run counts as successful (including empty runs).
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Success { .. } | RunStatus::Empty)
    }

    /// Human-readable status line.
    pub fn message(&self) -> String {
        match &self.status {
            RunStatus::Success { uploaded } => format!("success: {} item(s) uploaded", uploaded),
            RunStatus::Empty => "success: nothing to upload".to_string(),
            RunStatus::Cancelled { point, completed } => {
                format!("cancelled: {} ({} item(s) completed)", point, completed)
            }
            RunStatus::Failed { cause } => format!("error: {}", cause),
        }
    }

    /// Share links of completed uploads, skipping empty ones.
    pub fn urls(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.has_url())
            .map(|r| r.url.clone())
            .collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}
