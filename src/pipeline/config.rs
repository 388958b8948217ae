use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::genomics::{
    BadRegionIndex, CoverageError, CoverageThresholds, RefinePolicy, RegionSpecError, NO_REGIONS,
};
use crate::pipeline::qc::QcGate;
use crate::pipeline::tools::FilterParams;

/// Default run folder name.
pub const DEFAULT_RUN_NAME: &str = "miniON_Results";
/// Default consensus network model.
pub const DEFAULT_MODEL: &str = "r941_min_high_g360";

/// Errors raised while validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Ideal coverage below the masking cutoff.
    #[error("ideal coverage {ideal} cannot be lower than the coverage cutoff {cutoff}")]
    InvertedCoverage {
        /// Coverage cutoff.
        cutoff: u32,
        /// Ideal coverage.
        ideal: u32,
    },
    /// Frequency threshold outside `[0, 1]`.
    #[error("minimum variant frequency {0} must lie between 0 and 1")]
    FrequencyOutOfRange(f64),
    /// Sequence-coverage percentage outside `[0, 100]`.
    #[error("minimum sequence coverage {0}% must lie between 0 and 100")]
    SequenceCoverageOutOfRange(f64),
    /// Zero worker threads requested.
    #[error("thread count must be at least 1")]
    NoThreads,
    /// Malformed bad-region list.
    #[error("invalid bad-region specification: {0}")]
    BadRegions(#[from] RegionSpecError),
    /// Mandatory input that does not exist.
    #[error("{what} not found: {path}")]
    MissingInput {
        /// Which input.
        what: &'static str,
        /// Path given.
        path: PathBuf,
    },
}

/// Executables invoked for the external steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// Consensus generator.
    pub medaka_consensus: PathBuf,
    /// Variant caller and annotator.
    pub medaka: PathBuf,
    /// Depth extraction.
    pub samtools: PathBuf,
    /// Read-quality filter.
    pub nanofilt: PathBuf,
    /// Read statistics.
    pub nanostat: PathBuf,
    /// Pairwise aligner.
    pub mafft: PathBuf,
    /// VCF conversion and consensus application.
    pub bcftools: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            medaka_consensus: PathBuf::from("medaka_consensus"),
            medaka: PathBuf::from("medaka"),
            samtools: PathBuf::from("samtools"),
            nanofilt: PathBuf::from("NanoFilt"),
            nanostat: PathBuf::from("NanoStat"),
            mafft: PathBuf::from("mafft"),
            bcftools: PathBuf::from("bcftools"),
        }
    }
}

/// Inputs and thresholds for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Reference FASTA.
    pub reference: PathBuf,
    /// Folder holding the read files.
    pub samples_dir: PathBuf,
    /// Metadata table.
    pub metadata: PathBuf,
    /// Output folder name, created under `samples_dir`.
    pub run_name: String,
    /// Consensus network model.
    pub model: String,
    /// Depth below which consensus bases are masked and variants dropped.
    pub coverage_cutoff: u32,
    /// Depth considered high coverage.
    pub ideal_coverage: u32,
    /// Read-quality filter threshold; 0 disables filtering.
    pub min_read_quality: u32,
    /// Bases cropped from the read start.
    pub head_crop: u32,
    /// Bases cropped from the read end.
    pub tail_crop: u32,
    /// Minimum read length after cropping.
    pub min_read_length: u32,
    /// Minimum variant frequency.
    pub min_frequency: f64,
    /// Largest accepted indel.
    pub max_indel: usize,
    /// Minimum read count for a sample to be processed.
    pub min_reads: u64,
    /// Sequence-coverage percentage for a "good quality" verdict.
    pub min_sequence_coverage: f64,
    /// `locus:start-end;...` positions to exclude, or `none`.
    pub bad_regions: String,
    /// Threads handed to the consensus generator.
    pub threads: usize,
    /// Upper bound on each external invocation.
    pub tool_timeout: Duration,
    /// Keep scratch files in sample folders.
    pub keep_intermediates: bool,
    /// External executables.
    pub tools: ToolPaths,
}

impl PipelineConfig {
    /// Configuration with the standard thresholds.
    pub fn new(
        reference: impl Into<PathBuf>,
        samples_dir: impl Into<PathBuf>,
        metadata: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reference: reference.into(),
            samples_dir: samples_dir.into(),
            metadata: metadata.into(),
            run_name: DEFAULT_RUN_NAME.to_string(),
            model: DEFAULT_MODEL.to_string(),
            coverage_cutoff: 30,
            ideal_coverage: 200,
            min_read_quality: 10,
            head_crop: 70,
            tail_crop: 70,
            min_read_length: 50,
            min_frequency: 0.8,
            max_indel: 90,
            min_reads: 100,
            min_sequence_coverage: 70.0,
            bad_regions: NO_REGIONS.to_string(),
            threads: 8,
            tool_timeout: Duration::from_secs(6 * 60 * 60),
            keep_intermediates: false,
            tools: ToolPaths::default(),
        }
    }

    /// Check thresholds and inputs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ideal_coverage < self.coverage_cutoff {
            return Err(ConfigError::InvertedCoverage {
                cutoff: self.coverage_cutoff,
                ideal: self.ideal_coverage,
            });
        }
        if !(0.0..=1.0).contains(&self.min_frequency) {
            return Err(ConfigError::FrequencyOutOfRange(self.min_frequency));
        }
        if !(0.0..=100.0).contains(&self.min_sequence_coverage) {
            return Err(ConfigError::SequenceCoverageOutOfRange(self.min_sequence_coverage));
        }
        if self.threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        BadRegionIndex::parse(&self.bad_regions)?;

        require(&self.reference, "reference genome", Path::is_file)?;
        require(&self.samples_dir, "samples folder", Path::is_dir)?;
        require(&self.metadata, "metadata file", Path::is_file)?;
        Ok(())
    }

    /// Run output folder.
    pub fn run_dir(&self) -> PathBuf {
        self.samples_dir.join(&self.run_name)
    }

    /// Parsed exclusion index.
    pub fn bad_region_index(&self) -> Result<BadRegionIndex, ConfigError> {
        Ok(BadRegionIndex::parse(&self.bad_regions)?)
    }

    /// Variant acceptance thresholds.
    pub fn refine_policy(&self) -> RefinePolicy {
        RefinePolicy {
            coverage_cutoff: f64::from(self.coverage_cutoff),
            min_frequency: self.min_frequency,
            max_indel: self.max_indel,
        }
    }

    /// Coverage bands for the series export.
    pub fn coverage_thresholds(&self) -> Result<CoverageThresholds, CoverageError> {
        CoverageThresholds::new(self.coverage_cutoff, self.ideal_coverage)
    }

    /// Read-count and fragment-length gate.
    pub fn qc_gate(&self) -> QcGate {
        QcGate {
            min_reads: self.min_reads,
            head_crop: self.head_crop,
            tail_crop: self.tail_crop,
            min_read_length: self.min_read_length,
        }
    }

    /// Read-quality filter settings, `None` when filtering is disabled.
    pub fn filter_params(&self) -> Option<FilterParams> {
        (self.min_read_quality > 0).then(|| FilterParams {
            min_quality: self.min_read_quality,
            min_length: self.min_read_length,
            head_crop: self.head_crop,
            tail_crop: self.tail_crop,
        })
    }
}

fn require(path: &Path, what: &'static str, check: fn(&Path) -> bool) -> Result<(), ConfigError> {
    if check(path) {
        Ok(())
    } else {
        Err(ConfigError::MissingInput {
            what,
            path: path.to_path_buf(),
        })
    }
}
