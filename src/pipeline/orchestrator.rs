//! Sample discovery and the per-sample state machine.
//!
//! Each read file matched to a metadata row goes through QC, optional read
//! filtering with a second QC probe, consensus and variant calling,
//! refinement, masking and reporting. QC rejections and per-sample errors
//! are recorded in the [`RunContext`] and the batch continues.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::genomics::{
    gzip_file, pair_alignments, read_fasta_path, refine_file, write_fasta_path,
    write_pairwise_input, AlignmentPair, BadRegionIndex, CoverageSeries, CoverageThresholds,
    DepthTrack, FastaRecord, Masker,
};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::metadata::{MetadataRow, MetadataTable};
use crate::pipeline::qc::{QcVerdict, ReadStats, RejectionReason};
use crate::pipeline::report::{RunContext, RunSummary, SampleReport};
use crate::pipeline::state::{SampleRun, SampleState};
use crate::pipeline::tools::{Collaborators, ConsensusOutputs};
use crate::{CurationError, FailureKind};

/// Statistics report of the raw reads, kept in the sample folder.
pub const INITIAL_STATS: &str = "InitialStatsReport.txt";
/// Statistics report of the filtered reads, kept in the sample folder.
pub const FILTERED_STATS: &str = "FilteredStatsReport.txt";
/// Masked consensus written for each accepted sample.
pub const MASKED_CONSENSUS: &str = "consensus.fasta";
/// Coverage series exported for plotting.
pub const COVERAGE_SERIES: &str = "coverage_series.json";

const CONSENSUS_DIR: &str = "consensus_calls";
const DEPTH_FILE: &str = "reads_coverage.depth";
const VARIANTS_FILE: &str = "variants.vcf";
const SCRATCH_PREFIX: &str = "temporary";
const FILTERED_SUFFIX: &str = "_HQ.fastq.gz";
/// Present in a sample folder until its rows are reported; such folders are retried.
const INCOMPLETE_MARKER: &str = ".incomplete";

/// A read file matched to its metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCandidate {
    /// File name up to the first `.`.
    pub sample_id: String,
    /// Read file.
    pub reads: PathBuf,
    /// Matching metadata row.
    pub metadata: MetadataRow,
}

/// How a sample left the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// Rows appended to the batch tables.
    Accepted {
        /// Sample identifier.
        sample_id: String,
        /// Percentage of effective positions left unmasked.
        sequence_coverage: f64,
        /// Variants retained after refinement.
        variants: usize,
    },
    /// Stopped by a QC probe.
    Rejected {
        /// Sample identifier.
        sample_id: String,
        /// Why the probe failed.
        reason: RejectionReason,
    },
    /// Aborted by an error.
    Failed {
        /// Sample identifier.
        sample_id: String,
        /// Failure category.
        kind: FailureKind,
        /// Error message.
        cause: String,
    },
}

impl SampleOutcome {
    /// Sample identifier.
    pub fn sample_id(&self) -> &str {
        match self {
            Self::Accepted { sample_id, .. }
            | Self::Rejected { sample_id, .. }
            | Self::Failed { sample_id, .. } => sample_id,
        }
    }
}

/// Totals plus the outcome of every sample attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// End-of-run totals.
    pub summary: RunSummary,
    /// Per-sample outcomes in processing order.
    pub samples: Vec<SampleOutcome>,
}

/// Whether a file name is a raw read set: first extension segment `fastq`
/// and not a filtered output.
fn is_read_file(file_name: &str) -> bool {
    file_name.split('.').nth(1) == Some("fastq") && !file_name.contains("_HQ")
}

/// List read files in `samples_dir` that have a metadata row and no finished
/// output folder in `run_dir`, sorted by file name.
///
/// A folder still holding the incomplete marker belongs to a sample that
/// failed or was rejected with intermediates kept, and is retried.
pub fn discover_samples(
    samples_dir: &Path,
    run_dir: &Path,
    table: &MetadataTable,
) -> io::Result<Vec<SampleCandidate>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(samples_dir)? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_read_file(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();

    let mut candidates = Vec::new();
    for name in names {
        let sample_id = name.split('.').next().unwrap_or_default().to_string();
        let sample_dir = run_dir.join(&sample_id);
        if sample_dir.exists() {
            if !sample_dir.join(INCOMPLETE_MARKER).exists() {
                info!(sample = %sample_id, "output folder exists, skipping");
                continue;
            }
            info!(sample = %sample_id, "output folder is incomplete, retrying");
        }
        let Some(row) = table.find(&name, &sample_id) else {
            warn!(file = %name, "no metadata row for read file, skipping");
            continue;
        };
        candidates.push(SampleCandidate {
            reads: samples_dir.join(&name),
            metadata: row.clone(),
            sample_id,
        });
    }
    Ok(candidates)
}

/// Inputs shared by every sample of a run.
#[derive(Debug)]
struct RunInputs {
    regions: BadRegionIndex,
    thresholds: CoverageThresholds,
    reference: Vec<FastaRecord>,
}

enum Verdict {
    Accepted { sequence_coverage: f64, variants: usize },
    Rejected(RejectionReason),
}

/// Drives every discovered sample through the pipeline.
#[derive(Debug)]
pub struct Orchestrator<C> {
    config: PipelineConfig,
    tools: C,
}

impl<C: Collaborators> Orchestrator<C> {
    /// Orchestrator over a configuration and a set of collaborators.
    pub fn new(config: PipelineConfig, tools: C) -> Self {
        Self { config, tools }
    }

    /// Run configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every pending sample.
    ///
    /// Errors are returned only for run-level setup: invalid configuration,
    /// unreadable metadata or reference, unwritable reports.
    pub fn run(&self) -> Result<RunOutcome, CurationError> {
        self.config.validate()?;
        let table = MetadataTable::from_path(&self.config.metadata)?;
        let reference = read_fasta_path(&self.config.reference)?;
        let reference_name = reference.last().map(|r| r.header.clone()).unwrap_or_default();
        let inputs = RunInputs {
            regions: self.config.bad_region_index()?,
            thresholds: self.config.coverage_thresholds()?,
            reference,
        };

        let mut ctx = RunContext::open(&self.config, &table.header, reference_name)?;
        let candidates = discover_samples(&self.config.samples_dir, ctx.run_dir(), &table)
            .map_err(|err| CurationError::io("listing", &self.config.samples_dir, err))?;
        info!(
            samples = candidates.len(),
            run_dir = %ctx.run_dir().display(),
            regions = inputs.regions.len(),
            "starting run"
        );

        let mut samples = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            samples.push(self.process_sample(candidate, &mut ctx, &inputs));
            ctx.write_parameters()?;
        }

        let summary = ctx.finish()?;
        summary.log();
        Ok(RunOutcome { summary, samples })
    }

    fn process_sample(
        &self,
        candidate: &SampleCandidate,
        ctx: &mut RunContext,
        inputs: &RunInputs,
    ) -> SampleOutcome {
        let sample_id = candidate.sample_id.clone();
        let sample_number = ctx.begin_sample();
        let mut run = SampleRun::new(sample_id.as_str());
        info!(sample = %sample_id, number = sample_number, reads = %candidate.reads.display(), "processing sample");

        match self.curate(candidate, sample_number, &mut run, ctx, inputs) {
            Ok(Verdict::Accepted {
                sequence_coverage,
                variants,
            }) => SampleOutcome::Accepted {
                sample_id,
                sequence_coverage,
                variants,
            },
            Ok(Verdict::Rejected(reason)) => {
                ctx.record_rejection(&sample_id, &reason);
                SampleOutcome::Rejected { sample_id, reason }
            }
            Err(err) => {
                if let Err(transition) = run.advance(SampleState::Failed) {
                    debug!(%transition, "failure recorded after a terminal state");
                }
                let probe = probe_path(ctx.run_dir(), &sample_id);
                if let Err(err) = remove_if_exists(&probe) {
                    warn!(path = %probe.display(), %err, "could not remove partial statistics report");
                }
                self.discard(&ctx.run_dir().join(&sample_id));
                let kind = err.kind();
                let cause = err.to_string();
                ctx.record_failure(&sample_id, kind, cause.clone());
                SampleOutcome::Failed {
                    sample_id,
                    kind,
                    cause,
                }
            }
        }
    }

    fn curate(
        &self,
        candidate: &SampleCandidate,
        sample_number: usize,
        run: &mut SampleRun,
        ctx: &mut RunContext,
        inputs: &RunInputs,
    ) -> Result<Verdict, CurationError> {
        let id = candidate.sample_id.as_str();
        let sample_dir = ctx.run_dir().join(id);
        let gate = self.config.qc_gate();
        if sample_dir.exists() {
            fs::remove_dir_all(&sample_dir)
                .map_err(|err| CurationError::io("clearing", &sample_dir, err))?;
        }

        let probe = probe_path(ctx.run_dir(), id);
        let raw_stats = self.probe(&candidate.reads, &probe)?;
        if let QcVerdict::Reject(reason) = gate.evaluate(&raw_stats) {
            remove_if_exists(&probe).map_err(|err| CurationError::io("removing", &probe, err))?;
            run.advance(SampleState::Rejected)?;
            return Ok(Verdict::Rejected(reason));
        }
        run.advance(SampleState::Qc1Passed)?;

        fs::create_dir_all(&sample_dir).map_err(|err| CurationError::io("creating", &sample_dir, err))?;
        let marker = sample_dir.join(INCOMPLETE_MARKER);
        fs::write(&marker, "").map_err(|err| CurationError::io("writing", &marker, err))?;
        let initial_stats = sample_dir.join(INITIAL_STATS);
        fs::rename(&probe, &initial_stats).map_err(|err| CurationError::io("moving", &probe, err))?;

        let (reads, filtered_stats) = match self.config.filter_params() {
            Some(params) => {
                let filtered = sample_dir.join(format!("{id}{FILTERED_SUFFIX}"));
                self.tools.filter_reads(&candidate.reads, &filtered, &params)?;
                run.advance(SampleState::Filtered)?;

                let stats = self.probe(&filtered, &sample_dir.join(FILTERED_STATS))?;
                if let QcVerdict::Reject(reason) = gate.evaluate(&stats) {
                    run.advance(SampleState::Rejected)?;
                    self.discard(&sample_dir);
                    return Ok(Verdict::Rejected(reason));
                }
                run.advance(SampleState::Qc2Passed)?;
                (filtered, stats)
            }
            None => (candidate.reads.clone(), raw_stats),
        };
        run.advance(SampleState::Processing)?;

        let reference_path = self.config.reference.as_path();
        let consensus = self
            .tools
            .consensus(&reads, reference_path, &sample_dir.join(CONSENSUS_DIR))?;
        let depth_path = sample_dir.join(DEPTH_FILE);
        self.tools.depth(&consensus.bam, &depth_path)?;
        let vcf = sample_dir.join(VARIANTS_FILE);
        self.tools.call_variants(&consensus, reference_path, &vcf)?;

        let (refined, stats) = refine_file(&vcf, &self.config.refine_policy(), &inputs.regions)?;
        let variants = refined.extract();
        info!(sample = id, examined = stats.examined, retained = stats.retained, "variants refined");
        run.advance(SampleState::Refined)?;

        let draft = sample_dir.join(format!("{SCRATCH_PREFIX}_consensus.fasta"));
        self.tools.apply_variants(&vcf, reference_path, &draft)?;
        let pairs = self.align_to_reference(&inputs.reference, &read_fasta_path(&draft)?, &sample_dir)?;
        let track = DepthTrack::from_path(&depth_path)?;
        let masked = Masker::new(self.config.coverage_cutoff, &inputs.regions).mask_all(&pairs, &track)?;
        let sequence_coverage = masked.totals.sequence_coverage()?;
        let masked_path = sample_dir.join(MASKED_CONSENSUS);
        write_fasta_path(&masked_path, &masked.to_fasta_records(id))
            .map_err(|err| CurationError::io("writing", &masked_path, err))?;
        info!(
            sample = id,
            masked = masked.totals.n_count,
            effective = masked.totals.effective_length,
            sequence_coverage,
            "consensus masked"
        );
        run.advance(SampleState::Masked)?;

        CoverageSeries::aggregate(&track, &variants, inputs.thresholds)
            .write_json(sample_dir.join(COVERAGE_SERIES))?;
        self.finalize(id, &sample_dir, &consensus, &depth_path)?;

        ctx.append_sample(
            sample_number,
            &SampleReport {
                sample_id: id,
                metadata: &candidate.metadata,
                raw_stats,
                filtered_stats,
                average_coverage: track.mean_depth().map_or(0, |mean| mean.floor() as u64),
                sequence_coverage,
                masked_bases: masked.totals.n_count,
                sequence_gaps: masked.totals.mismatch_count,
                variants: &variants,
            },
        )?;
        remove_if_exists(&marker).map_err(|err| CurationError::io("removing", &marker, err))?;
        run.advance(SampleState::Reported)?;

        Ok(Verdict::Accepted {
            sequence_coverage,
            variants: variants.len(),
        })
    }

    fn probe(&self, reads: &Path, report: &Path) -> Result<ReadStats, CurationError> {
        self.tools.read_stats(reads, report)?;
        Ok(ReadStats::from_path(report)?)
    }

    /// Align each reference record to the consensus record with the same id.
    fn align_to_reference(
        &self,
        reference: &[FastaRecord],
        consensus: &[FastaRecord],
        sample_dir: &Path,
    ) -> Result<Vec<AlignmentPair>, CurationError> {
        let mut aligned = Vec::new();
        for (idx, reference_record) in reference.iter().enumerate() {
            let sample_record = consensus
                .iter()
                .find(|record| record.id() == reference_record.id())
                .ok_or_else(|| CurationError::MissingConsensusLocus(reference_record.id().to_string()))?;

            let input = sample_dir.join(format!("{SCRATCH_PREFIX}_pair_{idx}.fasta"));
            let output = sample_dir.join(format!("{SCRATCH_PREFIX}_aligned_{idx}.fasta"));
            write_pairwise_input(&input, reference_record, sample_record)
                .map_err(|err| CurationError::io("writing", &input, err))?;
            self.tools.align_pair(&input, &output)?;
            aligned.extend(read_fasta_path(&output)?);
        }
        Ok(pair_alignments(&aligned)?)
    }

    /// Compress the depth track, drop scratch files, and prefix the
    /// remaining files with the sample id.
    fn finalize(
        &self,
        sample_id: &str,
        sample_dir: &Path,
        consensus: &ConsensusOutputs,
        depth_path: &Path,
    ) -> Result<(), CurationError> {
        gzip_file(depth_path).map_err(|err| CurationError::io("compressing", depth_path, err))?;

        let files = list_files(sample_dir).map_err(|err| CurationError::io("listing", sample_dir, err))?;
        if !self.config.keep_intermediates {
            for path in [depth_path, consensus.probs.as_path()] {
                remove_if_exists(path).map_err(|err| CurationError::io("removing", path, err))?;
            }
            for (name, path) in &files {
                if name.starts_with(SCRATCH_PREFIX) || name.ends_with(FILTERED_SUFFIX) {
                    remove_if_exists(path).map_err(|err| CurationError::io("removing", path, err))?;
                }
            }
        }

        let prefix = format!("{sample_id}.");
        for (name, path) in list_files(sample_dir).map_err(|err| CurationError::io("listing", sample_dir, err))? {
            if name.starts_with(&prefix) || name == INCOMPLETE_MARKER {
                continue;
            }
            let target = sample_dir.join(format!("{prefix}{name}"));
            fs::rename(&path, &target).map_err(|err| CurationError::io("renaming", &path, err))?;
        }
        debug!(sample = sample_id, "sample folder finalised");
        Ok(())
    }

    /// Remove a sample folder unless intermediates are kept. A kept folder
    /// still holds the incomplete marker, so a later run retries it either way.
    fn discard(&self, sample_dir: &Path) {
        if self.config.keep_intermediates || !sample_dir.exists() {
            return;
        }
        if let Err(err) = fs::remove_dir_all(sample_dir) {
            warn!(path = %sample_dir.display(), %err, "could not remove sample folder");
        }
    }
}

fn probe_path(run_dir: &Path, sample_id: &str) -> PathBuf {
    run_dir.join(format!("{SCRATCH_PREFIX}_{sample_id}_stats.txt"))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Plain files directly inside `dir`, with their names.
fn list_files(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_files_need_fastq_as_first_extension() {
        assert!(is_read_file("S01.fastq"));
        assert!(is_read_file("S01.fastq.gz"));
        assert!(!is_read_file("S01_HQ.fastq.gz"));
        assert!(!is_read_file("S01.fq.gz"));
        assert!(!is_read_file("notes.txt.fastq"));
        assert!(!is_read_file("fastq"));
    }

    #[test]
    fn discovery_sorts_skips_done_and_unmatched() {
        let dir = tempfile::tempdir().unwrap();
        let samples = dir.path();
        let run_dir = samples.join("run");
        for name in ["S03.fastq.gz", "S01.fastq", "S02.fastq.gz", "S02_HQ.fastq.gz", "X9.fastq", "meta.csv"] {
            fs::write(samples.join(name), "").unwrap();
        }
        fs::create_dir_all(run_dir.join("S03")).unwrap();
        fs::create_dir_all(run_dir.join("S02")).unwrap();
        fs::write(run_dir.join("S02").join(INCOMPLETE_MARKER), "").unwrap();

        let row = |id: &str, file: &str| MetadataRow {
            sample_id: id.to_string(),
            file_name: file.to_string(),
            fields: vec![id.to_string(), file.to_string()],
        };
        let table = MetadataTable {
            header: vec!["id".into(), "file".into()],
            rows: vec![
                row("S02", "S02.fastq.gz"),
                row("S01", "S01.fastq"),
                row("S03", "S03.fastq.gz"),
            ],
        };

        let found = discover_samples(samples, &run_dir, &table).unwrap();
        let ids: Vec<&str> = found.iter().map(|c| c.sample_id.as_str()).collect();
        assert_eq!(ids, vec!["S01", "S02"]);
        assert_eq!(found[1].reads, samples.join("S02.fastq.gz"));
    }

    #[test]
    fn remove_if_exists_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        remove_if_exists(&dir.path().join("absent")).unwrap();
    }
}
