//! # nanocurate
//!
//! Variant curation and coverage-masked consensus for batches of nanopore
//! samples sequenced against a shared, possibly multi-segment, reference.
//!
//! ## Components
//!
//! 1. **Bad-region index**: expands `locus:start-end;...` into excluded positions
//! 2. **Variant refinement**: recomputes frequency and indel size, filters the
//!    variant file in place, and extracts report fields
//! 3. **Alignment-aware masking**: walks each reference/consensus alignment
//!    against the depth track and masks poorly covered bases with `N`
//! 4. **Coverage series**: per-locus depth bands plus variant markers for plotting
//! 5. **Orchestration**: per-sample QC gating, external tools, batch reports
//!
//! ## Usage Example
//!
//! ```ignore
//! use nanocurate::{ExternalTools, Orchestrator, PipelineConfig};
//!
//! let config = PipelineConfig::new("ref.fasta", "reads/", "samples.csv");
//! config.validate()?;
//! let tools = ExternalTools::from_config(&config);
//! let outcome = Orchestrator::new(config, tools).run()?;
//! println!("{} accepted", outcome.summary.accepted);
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod genomics; // Parsers and curation components
pub mod pipeline; // Configuration, external tools and the sample orchestrator

pub use genomics::{
    BadRegionIndex, CoverageSeries, CoverageThresholds, DepthTrack, MaskedConsensus, Masker,
    RefinePolicy, RegionKey, VariantRecord, VariantStream, VariantSummary, VariantType,
};
pub use pipeline::{
    Collaborators, ExternalTools, Orchestrator, PipelineConfig, RunContext, RunOutcome,
    RunSummary, SampleOutcome, SampleState,
};

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Category of a per-sample failure, as listed in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Malformed variant, depth, alignment, metadata or statistics input.
    InputFormat,
    /// External process failed to start, exited unsuccessfully, or timed out.
    Collaborator,
    /// Metric with an empty denominator.
    DegenerateMetric,
    /// Threshold or input path rejected before processing.
    Configuration,
    /// Filesystem failure.
    Io,
    /// Broken internal invariant, such as an illegal lifecycle step.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InputFormat => "input-format",
            Self::Collaborator => "collaborator",
            Self::DegenerateMetric => "degenerate-metric",
            Self::Configuration => "configuration",
            Self::Io => "io",
            Self::Internal => "internal",
        })
    }
}

/// Errors raised while curating a sample or setting up a run.
#[derive(Error, Debug)]
pub enum CurationError {
    /// Malformed bad-region specification.
    #[error(transparent)]
    Regions(#[from] genomics::RegionSpecError),
    /// Malformed variant stream.
    #[error(transparent)]
    Variants(#[from] genomics::VariantParseError),
    /// Malformed depth track.
    #[error(transparent)]
    Depth(#[from] genomics::DepthParseError),
    /// Malformed FASTA or alignment.
    #[error(transparent)]
    Fasta(#[from] genomics::FastaError),
    /// Masking failure.
    #[error(transparent)]
    Masking(#[from] genomics::MaskingError),
    /// Coverage series failure.
    #[error(transparent)]
    Coverage(#[from] genomics::CoverageError),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] pipeline::ConfigError),
    /// Unreadable metadata table.
    #[error(transparent)]
    Metadata(#[from] pipeline::MetadataError),
    /// Unreadable read statistics.
    #[error(transparent)]
    Qc(#[from] pipeline::QcError),
    /// External collaborator failure.
    #[error(transparent)]
    Tool(#[from] pipeline::ToolError),
    /// Report writer failure.
    #[error(transparent)]
    Report(#[from] pipeline::ReportError),
    /// Illegal lifecycle step.
    #[error(transparent)]
    Transition(#[from] pipeline::TransitionError),
    /// Consensus record missing for a reference locus.
    #[error("consensus has no record for reference locus '{0}'")]
    MissingConsensusLocus(String),
    /// Filesystem failure on a known path.
    #[error("{action} {path}: {source}")]
    Io {
        /// What was attempted.
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

impl CurationError {
    /// Wrap an I/O failure with the path it concerns.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Failure category.
    pub fn kind(&self) -> FailureKind {
        use genomics::{CoverageError, DepthParseError, FastaError, MaskingError, VariantParseError};
        use pipeline::{QcError, ReportError};

        match self {
            Self::Variants(VariantParseError::Io(_))
            | Self::Depth(DepthParseError::Io(_))
            | Self::Fasta(FastaError::Io(_))
            | Self::Coverage(CoverageError::Io(_))
            | Self::Qc(QcError::Io(_))
            | Self::Report(ReportError::Io(_))
            | Self::Io { .. } => FailureKind::Io,
            Self::Masking(MaskingError::EmptyEffectiveLength) => FailureKind::DegenerateMetric,
            Self::Regions(_)
            | Self::Variants(_)
            | Self::Depth(_)
            | Self::Fasta(_)
            | Self::Masking(_)
            | Self::Metadata(_)
            | Self::Qc(_)
            | Self::MissingConsensusLocus(_) => FailureKind::InputFormat,
            Self::Tool(_) => FailureKind::Collaborator,
            Self::Config(_) | Self::Coverage(CoverageError::InvertedThresholds { .. }) => {
                FailureKind::Configuration
            }
            Self::Coverage(_) | Self::Report(_) => FailureKind::Io,
            Self::Transition(_) => FailureKind::Internal,
        }
    }
}
