//! Run-level outputs: the batch report, the variant-detail table, and the
//! parameters report.
//!
//! [`RunContext`] owns both CSV writers for the whole run. Rows are flushed
//! as they are appended, so a run that stops early leaves complete rows
//! behind, and reopening an existing run folder appends without repeating
//! headers.

use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::genomics::{VariantSummary, VariantType};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::metadata::MetadataRow;
use crate::pipeline::qc::{ReadStats, RejectionReason};
use crate::FailureKind;

/// Batch report file name.
pub const BATCH_REPORT: &str = "miniON_Data_ProcessingReport.csv";
/// Variant-detail table file name.
pub const MUTATION_REPORT: &str = "Detected_Mutations.csv";
/// Parameters report file name.
pub const PARAMETERS_REPORT: &str = "RunParameters.txt";

/// Status for a sample whose sequence coverage exceeds the minimum.
pub const GOOD_QUALITY: &str = "Sample with good quality";
/// Status for a sample with too much of its consensus masked.
pub const LOW_COVERAGE_WARNING: &str = "Warning: Not enough sequence coverage";

const SAMPLE_COLUMNS: [&str; 16] = [
    "Mean Read Quality",
    "Mean Reads Size",
    "Total Number Reads",
    "Total Number Bases",
    "Average Coverage",
    "Consensus sequence coverage",
    "Number Masked Bases",
    "Detected mutations",
    "Number Insertions",
    "Number Deletions",
    "Sequence gaps",
    "Mean Read Quality After Filter",
    "Mean Reads Size After Filter",
    "Number Reads After Filter",
    "Number Bases After Filter",
    "Sample Status",
];

const MUTATION_COLUMNS: [&str; 8] = [
    "Sample Number",
    "Sample ID",
    "Mutation",
    "Type",
    "Locus",
    "Position",
    "Frequency",
    "Coverage",
];

const RULE: &str = "===============================================================================================================================";

/// Errors raised while writing run reports.
#[derive(Debug, Error)]
pub enum ReportError {
    /// CSV writer failure.
    #[error("failed to write {path}: {source}")]
    Csv {
        /// Table path.
        path: PathBuf,
        /// Writer failure.
        #[source]
        source: csv::Error,
    },
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Everything the batch report records for one accepted sample.
#[derive(Debug, Clone)]
pub struct SampleReport<'a> {
    /// Sample identifier taken from the read file name.
    pub sample_id: &'a str,
    /// Metadata row, copied into the batch row and fitted to the header width.
    pub metadata: &'a MetadataRow,
    /// Statistics of the raw reads.
    pub raw_stats: ReadStats,
    /// Statistics of the reads used for the consensus.
    pub filtered_stats: ReadStats,
    /// Integer mean depth.
    pub average_coverage: u64,
    /// Percentage of effective positions left unmasked.
    pub sequence_coverage: f64,
    /// Bases masked with `N`.
    pub masked_bases: usize,
    /// Indel columns in the consensus alignment.
    pub sequence_gaps: usize,
    /// Retained variants.
    pub variants: &'a [VariantSummary],
}

#[derive(Debug, Serialize)]
struct MutationRow<'a> {
    #[serde(rename = "Sample Number")]
    sample_number: usize,
    #[serde(rename = "Sample ID")]
    sample_id: &'a str,
    #[serde(rename = "Mutation")]
    mutation: &'a str,
    #[serde(rename = "Type")]
    variant_type: VariantType,
    #[serde(rename = "Locus")]
    locus: &'a str,
    #[serde(rename = "Position")]
    position: u64,
    #[serde(rename = "Frequency")]
    frequency: f64,
    #[serde(rename = "Coverage")]
    coverage: f64,
}

/// A sample that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSample {
    /// Sample identifier.
    pub sample_id: String,
    /// Failure category.
    pub kind: FailureKind,
    /// Error message.
    pub cause: String,
}

/// End-of-run totals.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Samples that entered QC.
    pub analysed: usize,
    /// Samples with rows in the batch report.
    pub accepted: usize,
    /// Samples rejected by QC.
    pub rejected: Vec<String>,
    /// Samples aborted by an error.
    pub failed: Vec<FailedSample>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Mean wall time per analysed sample.
    pub fn average_per_sample(&self) -> Duration {
        average(self.elapsed, self.analysed)
    }

    /// Emit the summary through the log.
    pub fn log(&self) {
        info!(
            analysed = self.analysed,
            accepted = self.accepted,
            rejected = self.rejected.len(),
            failed = self.failed.len(),
            total_min = minutes(self.elapsed),
            average_min = minutes(self.average_per_sample()),
            "run finished"
        );
        if !self.rejected.is_empty() {
            info!("samples rejected by QC: {}", self.rejected.join(", "));
        }
        for failure in &self.failed {
            warn!(sample = %failure.sample_id, kind = %failure.kind, "sample failed: {}", failure.cause);
        }
    }
}

#[derive(Debug, Clone)]
struct RunParameters {
    analysis_name: String,
    date: String,
    reference_name: String,
    model: String,
    min_read_quality: u32,
    coverage_cutoff: u32,
    head_crop: u32,
    tail_crop: u32,
    bad_regions: String,
    min_sequence_coverage: f64,
}

struct TableWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl TableWriter {
    fn open(path: PathBuf, header: &[String]) -> Result<Self, ReportError> {
        let is_new = fs::metadata(&path).map(|meta| meta.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut table = Self {
            path,
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(file),
        };
        if is_new {
            table.write_record(header)?;
        }
        Ok(table)
    }

    fn write_record<I, T>(&mut self, record: I) -> Result<(), ReportError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(record).map_err(|source| self.csv_error(source))?;
        self.writer.flush()?;
        Ok(())
    }

    fn serialize<S: Serialize>(&mut self, row: S) -> Result<(), ReportError> {
        self.writer.serialize(row).map_err(|source| self.csv_error(source))
    }

    fn flush(&mut self) -> Result<(), ReportError> {
        Ok(self.writer.flush()?)
    }

    fn csv_error(&self, source: csv::Error) -> ReportError {
        ReportError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

impl fmt::Debug for TableWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableWriter").field("path", &self.path).finish_non_exhaustive()
    }
}

/// Output handles and bookkeeping for one pipeline run.
#[derive(Debug)]
pub struct RunContext {
    run_dir: PathBuf,
    metadata_width: usize,
    batch: TableWriter,
    mutations: TableWriter,
    parameters: RunParameters,
    started: Instant,
    analysed: usize,
    accepted: usize,
    rejected: Vec<String>,
    failed: Vec<FailedSample>,
}

impl RunContext {
    /// Create the run folder if needed and open both tables for appending.
    pub fn open(
        config: &PipelineConfig,
        metadata_header: &[String],
        reference_name: impl Into<String>,
    ) -> Result<Self, ReportError> {
        let run_dir = config.run_dir();
        fs::create_dir_all(&run_dir)?;

        let batch_header: Vec<String> = metadata_header
            .iter()
            .cloned()
            .chain(SAMPLE_COLUMNS.iter().map(|c| c.to_string()))
            .collect();
        let mutation_header: Vec<String> = MUTATION_COLUMNS.iter().map(|c| c.to_string()).collect();

        Ok(Self {
            metadata_width: metadata_header.len(),
            batch: TableWriter::open(run_dir.join(BATCH_REPORT), &batch_header)?,
            mutations: TableWriter::open(run_dir.join(MUTATION_REPORT), &mutation_header)?,
            parameters: RunParameters {
                analysis_name: config.run_name.clone(),
                date: chrono::Local::now().format("%Y-%m-%d %H:%M").to_string(),
                reference_name: reference_name.into(),
                model: config.model.clone(),
                min_read_quality: config.min_read_quality,
                coverage_cutoff: config.coverage_cutoff,
                head_crop: config.head_crop,
                tail_crop: config.tail_crop,
                bad_regions: config.bad_regions.clone(),
                min_sequence_coverage: config.min_sequence_coverage,
            },
            run_dir,
            started: Instant::now(),
            analysed: 0,
            accepted: 0,
            rejected: Vec::new(),
            failed: Vec::new(),
        })
    }

    /// Run output folder.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Count a sample entering QC and return its 1-based number.
    pub fn begin_sample(&mut self) -> usize {
        self.analysed += 1;
        self.analysed
    }

    /// Status text for a sequence-coverage percentage.
    pub fn sample_status(&self, sequence_coverage: f64) -> &'static str {
        if sequence_coverage > self.parameters.min_sequence_coverage {
            GOOD_QUALITY
        } else {
            LOW_COVERAGE_WARNING
        }
    }

    /// Append an accepted sample's batch row and variant rows.
    pub fn append_sample(&mut self, sample_number: usize, report: &SampleReport<'_>) -> Result<(), ReportError> {
        let insertions = count_type(report.variants, VariantType::Insertion);
        let deletions = count_type(report.variants, VariantType::Deletion);
        let raw = &report.raw_stats;
        let filtered = &report.filtered_stats;

        // Ragged metadata rows are padded or cut so every batch row has the header's width.
        let metadata = report
            .metadata
            .fields
            .iter()
            .cloned()
            .chain(std::iter::repeat(String::new()))
            .take(self.metadata_width);
        let row: Vec<String> = metadata
            .chain([
                raw.mean_quality.to_string(),
                raw.mean_read_length.to_string(),
                raw.number_of_reads.to_string(),
                raw.number_of_bases.to_string(),
                report.average_coverage.to_string(),
                report.sequence_coverage.to_string(),
                report.masked_bases.to_string(),
                report.variants.len().to_string(),
                insertions.to_string(),
                deletions.to_string(),
                report.sequence_gaps.to_string(),
                filtered.mean_quality.to_string(),
                filtered.mean_read_length.to_string(),
                filtered.number_of_reads.to_string(),
                filtered.number_of_bases.to_string(),
                self.sample_status(report.sequence_coverage).to_string(),
            ])
            .collect();
        self.batch.write_record(&row)?;

        let sample_id = report.sample_id;
        for variant in report.variants {
            self.mutations.serialize(MutationRow {
                sample_number,
                sample_id,
                mutation: &variant.mutation,
                variant_type: variant.variant_type,
                locus: &variant.locus_id,
                position: variant.position,
                frequency: variant.frequency,
                coverage: variant.total_depth,
            })?;
        }
        self.mutations.flush()?;

        self.accepted += 1;
        Ok(())
    }

    /// Record a QC rejection.
    pub fn record_rejection(&mut self, sample_id: &str, reason: &RejectionReason) {
        warn!(sample = sample_id, %reason, "sample rejected by QC");
        self.rejected.push(sample_id.to_string());
    }

    /// Record a sample aborted by an error.
    pub fn record_failure(&mut self, sample_id: &str, kind: FailureKind, cause: impl Into<String>) {
        let cause = cause.into();
        warn!(sample = sample_id, %kind, "sample failed: {cause}");
        self.failed.push(FailedSample {
            sample_id: sample_id.to_string(),
            kind,
            cause,
        });
    }

    /// Rewrite the parameters report with the current totals.
    pub fn write_parameters(&self) -> Result<(), ReportError> {
        let text = render_parameters(&self.parameters, &self.summary());
        fs::write(self.run_dir.join(PARAMETERS_REPORT), text)?;
        Ok(())
    }

    /// Current totals.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            analysed: self.analysed,
            accepted: self.accepted,
            rejected: self.rejected.clone(),
            failed: self.failed.clone(),
            elapsed: self.started.elapsed(),
        }
    }

    /// Flush both tables, write the final parameters report, and return the totals.
    pub fn finish(mut self) -> Result<RunSummary, ReportError> {
        self.batch.flush()?;
        self.mutations.flush()?;
        self.write_parameters()?;
        Ok(self.summary())
    }
}

fn count_type(variants: &[VariantSummary], variant_type: VariantType) -> usize {
    variants.iter().filter(|v| v.variant_type == variant_type).count()
}

fn average(total: Duration, count: usize) -> Duration {
    match u32::try_from(count) {
        Ok(0) | Err(_) => Duration::ZERO,
        Ok(count) => total / count,
    }
}

fn minutes(duration: Duration) -> f64 {
    (duration.as_secs_f64() / 60.0 * 10.0).round() / 10.0
}

fn render_parameters(params: &RunParameters, summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(
        out,
        "      Running information and parameters of the automated pipeline for nanopore data processing"
    );
    let _ = writeln!(out, "{RULE}");

    let rows: [(&str, String); 13] = [
        ("Analysis code name", params.analysis_name.clone()),
        ("Analysis running date", params.date.clone()),
        ("Genome reference", params.reference_name.clone()),
        ("Consensus model used", params.model.clone()),
        ("Minimum reads quality cutoff", params.min_read_quality.to_string()),
        ("Coverage cutoff for masking", params.coverage_cutoff.to_string()),
        ("Base trimming head crop on reads", params.head_crop.to_string()),
        ("Base trimming tail crop on reads", params.tail_crop.to_string()),
        ("Other masking intervals", params.bad_regions.clone()),
        ("Minimum sequence coverage (%)", params.min_sequence_coverage.to_string()),
        ("Number of files processed", summary.analysed.to_string()),
        ("Total processing time", format!("{} min", minutes(summary.elapsed))),
        (
            "Average processing time per sample",
            format!("{} min", minutes(summary.average_per_sample())),
        ),
    ];
    for (label, value) in rows {
        let _ = writeln!(out, "\n   {label:<40}{value}");
    }
    if !summary.rejected.is_empty() {
        let _ = writeln!(out, "\n   {:<40}{}", "Samples rejected by QC", summary.rejected.join(", "));
    }
    if !summary.failed.is_empty() {
        let failed: Vec<String> = summary
            .failed
            .iter()
            .map(|f| format!("{} ({})", f.sample_id, f.kind))
            .collect();
        let _ = writeln!(out, "\n   {:<40}{}", "Samples failed", failed.join(", "));
    }
    let _ = writeln!(out, "\n{RULE}");
    out
}
