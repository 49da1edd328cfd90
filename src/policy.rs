//! What happens to the buffer after a flush resolves
//!
//! | threshold    | on failure                                       |
//! |--------------|--------------------------------------------------|
//! | `Bounded(0)` | drop the batch, report the error                 |
//! | `Bounded(n)` | keep the batch until the n-th consecutive failure, then drop and report |
//! | `Unbounded`  | drop the batch, never report                     |
//!
//! Success always clears the buffer and resets the failure counter.

use crate::config::ErrorThreshold;

/// Buffer disposition decided by the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Clear the buffer. `report` says whether the caller sees the failure.
    Drop { report: bool },
    /// Keep the buffer for the next flush attempt
    Retain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    threshold: ErrorThreshold,
}

impl FailurePolicy {
    pub fn new(threshold: ErrorThreshold) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> ErrorThreshold {
        self.threshold
    }

    pub fn on_success(&self, failures: &mut u32) {
        *failures = 0;
    }

    pub fn on_failure(&self, failures: &mut u32) -> Verdict {
        match self.threshold {
            ErrorThreshold::Unbounded => {
                *failures = 0;
                Verdict::Drop { report: false }
            }
            ErrorThreshold::Bounded(limit) => {
                *failures = failures.saturating_add(1);
                if *failures < limit {
                    Verdict::Retain
                } else {
                    *failures = 0;
                    Verdict::Drop { report: true }
                }
            }
        }
    }
}

impl From<ErrorThreshold> for FailurePolicy {
    fn from(threshold: ErrorThreshold) -> Self {
        Self::new(threshold)
    }
}
