//! Run orchestration: configuration, sample discovery, QC gating, external
//! collaborators, and batch reporting.
//!
//! Samples are processed one at a time. A failure inside one sample is
//! recorded against that sample and the batch moves on; only setup failures
//! abort the run.

mod config;
mod metadata;
mod orchestrator;
mod qc;
mod report;
mod state;
mod tools;

pub use config::{ConfigError, PipelineConfig, ToolPaths, DEFAULT_MODEL, DEFAULT_RUN_NAME};
pub use metadata::{MetadataError, MetadataRow, MetadataTable};
pub use orchestrator::{
    discover_samples, Orchestrator, RunOutcome, SampleCandidate, SampleOutcome, COVERAGE_SERIES,
    FILTERED_STATS, INITIAL_STATS, MASKED_CONSENSUS,
};
pub use qc::{QcError, QcGate, QcVerdict, ReadStats, RejectionReason};
pub use report::{
    FailedSample, ReportError, RunContext, RunSummary, SampleReport, BATCH_REPORT,
    GOOD_QUALITY, LOW_COVERAGE_WARNING, MUTATION_REPORT, PARAMETERS_REPORT,
};
pub use state::{SampleRun, SampleState, TransitionError};
pub use tools::{Collaborators, ConsensusOutputs, ExternalTools, FilterParams, ToolError};
