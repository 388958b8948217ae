//! Per-sample lifecycle.
//!
//! ```text
//! Pending -> Qc1Passed -> [Filtered -> Qc2Passed] -> Processing -> Refined -> Masked -> Reported
//!    \            \              \
//!     +-> Rejected +-> (Failed)   +-> Rejected
//! ```
//!
//! Any non-terminal state may move to `Failed`.

use std::fmt;

use thiserror::Error;

/// Stage of a sample in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleState {
    /// Matched to metadata, nothing run yet.
    Pending,
    /// Raw reads passed the QC probe.
    Qc1Passed,
    /// Reads passed through the quality filter.
    Filtered,
    /// Filtered reads passed the QC probe.
    Qc2Passed,
    /// Consensus and variant calling under way.
    Processing,
    /// Variant file refined.
    Refined,
    /// Consensus masked.
    Masked,
    /// Rows appended to the batch tables.
    Reported,
    /// Failed a QC probe.
    Rejected,
    /// Aborted by an error.
    Failed,
}

impl SampleState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Reported | Self::Rejected | Self::Failed)
    }

    /// Whether `next` is a legal successor.
    pub fn can_transition_to(&self, next: SampleState) -> bool {
        use SampleState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Qc1Passed)
                | (Pending, Rejected)
                | (Qc1Passed, Filtered)
                | (Qc1Passed, Processing)
                | (Filtered, Qc2Passed)
                | (Filtered, Rejected)
                | (Qc2Passed, Processing)
                | (Processing, Refined)
                | (Refined, Masked)
                | (Masked, Reported)
        )
    }
}

impl fmt::Display for SampleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Qc1Passed => "qc1-passed",
            Self::Filtered => "filtered",
            Self::Qc2Passed => "qc2-passed",
            Self::Processing => "processing",
            Self::Refined => "refined",
            Self::Masked => "masked",
            Self::Reported => "reported",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Illegal lifecycle step.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("sample '{sample_id}' cannot move from {from} to {to}")]
pub struct TransitionError {
    /// Sample identifier.
    pub sample_id: String,
    /// Current state.
    pub from: SampleState,
    /// Requested state.
    pub to: SampleState,
}

/// Lifecycle tracker for one sample.
#[derive(Debug, Clone)]
pub struct SampleRun {
    sample_id: String,
    history: Vec<SampleState>,
}

impl SampleRun {
    /// Start a sample in `Pending`.
    pub fn new(sample_id: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            history: vec![SampleState::Pending],
        }
    }

    /// Sample identifier.
    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    /// Current state.
    pub fn state(&self) -> SampleState {
        self.history.last().copied().unwrap_or(SampleState::Pending)
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[SampleState] {
        &self.history
    }

    /// Move to `next`, rejecting illegal steps.
    pub fn advance(&mut self, next: SampleState) -> Result<(), TransitionError> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(TransitionError {
                sample_id: self.sample_id.clone(),
                from: current,
                to: next,
            });
        }
        tracing::info!(sample = %self.sample_id, from = %current, to = %next, "sample transition");
        self.history.push(next);
        Ok(())
    }
}
