//! Cooperative cancellation.
//!
//! A [`CancellationGate`] is a shared flag that a host trips from the
//! outside (a signal handler, a UI button) and that the upload code
//! consults at its explicit check points. Nothing is interrupted
//! preemptively: work between two check points always runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

/// Shared cancellation flag for one upload invocation.
///
/// Clones observe the same flag. Once tripped the gate stays tripped
/// until [`reset`](Self::reset) is called, which hosts do at the start of
/// the next invocation.
#[derive(Debug, Clone, Default)]
pub struct CancellationGate {
    tripped: Arc<AtomicBool>,
}

impl CancellationGate {
    /// Create a gate in the cleared state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
    }

    /// Clear the flag for a new invocation.
    pub fn reset(&self) {
        self.tripped.store(false, Ordering::SeqCst);
    }

    /// Check the flag without failing.
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Fail with [`Error::Cancelled`] if the gate has been tripped.
    ///
    /// `point` names the work about to be issued and ends up in the
    /// cancellation status shown to the user.
    pub fn check(&self, point: impl AsRef<str>) -> Result<()> {
        if self.is_tripped() {
            return Err(Error::Cancelled(point.as_ref().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_passes_when_clear() {
        let gate = CancellationGate::new();
        assert!(gate.check("anything").is_ok());
    }

    #[test]
    fn test_trip_is_sticky_and_shared() {
        let gate = CancellationGate::new();
        let observer = gate.clone();

        gate.trip();
        assert!(observer.is_tripped());

        match observer.check("uploading a.txt") {
            Err(Error::Cancelled(point)) => assert_eq!(point, "uploading a.txt"),
            other => panic!("expected cancellation, got {:?}", other),
        }
        // still tripped on the second look
        assert!(observer.check("again").is_err());
    }

    #[test]
    fn test_reset_clears() {
        let gate = CancellationGate::new();
        gate.trip();
        gate.reset();
        assert!(!gate.is_tripped());
        assert!(gate.check("next run").is_ok());
    }
}
