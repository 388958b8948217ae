//! External collaborators.
//!
//! Every process the pipeline launches sits behind [`Collaborators`], so the
//! orchestrator can be driven by a fake in tests. [`ExternalTools`] is the
//! process-spawning implementation: each invocation blocks until the child
//! exits or its timeout elapses, stdout may be redirected to a file (gzipped
//! when the target ends in `.gz`) and stdin may be fed from a file
//! (decompressed when it ends in `.gz`).

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::debug;

use crate::genomics::{is_gzipped, open_text};
use crate::pipeline::config::{PipelineConfig, ToolPaths};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Trailing stderr kept in a failure report.
const STDERR_TAIL: usize = 2048;

/// Errors raised by an external collaborator.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Executable could not be started.
    #[error("failed to start {tool}: {source}")]
    Spawn {
        /// Tool name.
        tool: String,
        /// Spawn failure.
        #[source]
        source: io::Error,
    },
    /// Process exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        /// Tool name.
        tool: String,
        /// Exit status text.
        status: String,
        /// Tail of the process's stderr.
        stderr: String,
    },
    /// Process exceeded its time limit and was killed.
    #[error("{tool} did not finish within {timeout:?}")]
    TimedOut {
        /// Tool name.
        tool: String,
        /// Limit that elapsed.
        timeout: Duration,
    },
    /// Expected output missing after a successful run.
    #[error("{tool} produced no output at {path}")]
    MissingOutput {
        /// Tool name.
        tool: String,
        /// Expected file.
        path: PathBuf,
    },
    /// Redirection or scratch-file failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Read-quality filter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterParams {
    /// Minimum mean read quality.
    pub min_quality: u32,
    /// Minimum read length.
    pub min_length: u32,
    /// Bases trimmed from the read start.
    pub head_crop: u32,
    /// Bases trimmed from the read end.
    pub tail_crop: u32,
}

/// Files left by the consensus generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusOutputs {
    /// Reads aligned to the reference.
    pub bam: PathBuf,
    /// Consensus probabilities, input to variant calling.
    pub probs: PathBuf,
    /// Draft consensus sequence.
    pub consensus: PathBuf,
}

impl ConsensusOutputs {
    /// Standard file names inside a consensus output folder.
    pub fn in_dir(out_dir: &Path) -> Self {
        Self {
            bam: out_dir.join("calls_to_draft.bam"),
            probs: out_dir.join("consensus_probs.hdf"),
            consensus: out_dir.join("consensus.fasta"),
        }
    }
}

/// The external steps a sample goes through.
pub trait Collaborators {
    /// Write a `key<TAB>value` statistics report for a read set.
    fn read_stats(&self, reads: &Path, report: &Path) -> Result<(), ToolError>;

    /// Quality-filter and crop a read set into `output`.
    fn filter_reads(&self, reads: &Path, output: &Path, params: &FilterParams) -> Result<(), ToolError>;

    /// Build a consensus of `reads` against `reference` inside `out_dir`.
    fn consensus(&self, reads: &Path, reference: &Path, out_dir: &Path) -> Result<ConsensusOutputs, ToolError>;

    /// Write the per-base depth track of an alignment, covering every reference position.
    fn depth(&self, bam: &Path, output: &Path) -> Result<(), ToolError>;

    /// Call and annotate variants into `output`.
    fn call_variants(&self, consensus: &ConsensusOutputs, reference: &Path, output: &Path) -> Result<(), ToolError>;

    /// Apply the variants in `vcf` to `reference`, writing the sample consensus.
    fn apply_variants(&self, vcf: &Path, reference: &Path, output: &Path) -> Result<(), ToolError>;

    /// Align the two records in `input`, writing the aligned FASTA to `output`.
    fn align_pair(&self, input: &Path, output: &Path) -> Result<(), ToolError>;
}

impl<T: Collaborators + ?Sized> Collaborators for &T {
    fn read_stats(&self, reads: &Path, report: &Path) -> Result<(), ToolError> {
        (**self).read_stats(reads, report)
    }

    fn filter_reads(&self, reads: &Path, output: &Path, params: &FilterParams) -> Result<(), ToolError> {
        (**self).filter_reads(reads, output, params)
    }

    fn consensus(&self, reads: &Path, reference: &Path, out_dir: &Path) -> Result<ConsensusOutputs, ToolError> {
        (**self).consensus(reads, reference, out_dir)
    }

    fn depth(&self, bam: &Path, output: &Path) -> Result<(), ToolError> {
        (**self).depth(bam, output)
    }

    fn call_variants(&self, consensus: &ConsensusOutputs, reference: &Path, output: &Path) -> Result<(), ToolError> {
        (**self).call_variants(consensus, reference, output)
    }

    fn apply_variants(&self, vcf: &Path, reference: &Path, output: &Path) -> Result<(), ToolError> {
        (**self).apply_variants(vcf, reference, output)
    }

    fn align_pair(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        (**self).align_pair(input, output)
    }
}

/// Runs the collaborators as child processes.
#[derive(Debug, Clone)]
pub struct ExternalTools {
    paths: ToolPaths,
    model: String,
    threads: usize,
    timeout: Duration,
}

impl ExternalTools {
    /// Tools configured from a pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            paths: config.tools.clone(),
            model: config.model.clone(),
            threads: config.threads,
            timeout: config.tool_timeout,
        }
    }

    fn run(&self, mut command: Command, stdin: Option<&Path>, stdout: Option<&Path>) -> Result<(), ToolError> {
        let tool = tool_name(&command);
        debug!(command = ?command, "running external tool");
        let started = Instant::now();

        let target = stdout
            .map(|path| File::create(path).map(|file| (file, is_gzipped(path))))
            .transpose()?;
        command
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(if target.is_some() { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|source| ToolError::Spawn {
            tool: tool.clone(),
            source,
        })?;

        let feeder = match (stdin, child.stdin.take()) {
            (Some(path), Some(pipe)) => Some(feed_stdin(path.to_path_buf(), pipe)),
            _ => None,
        };
        let sink = match (target, child.stdout.take()) {
            (Some((file, gzip)), Some(pipe)) => Some(drain_stdout(pipe, file, gzip)),
            _ => None,
        };
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut bytes = Vec::new();
                pipe.read_to_end(&mut bytes)
                    .map(|_| String::from_utf8_lossy(&bytes).into_owned())
            })
        });

        // Pipe threads of a killed child are left detached.
        let Some(status) = wait_with_timeout(&mut child, self.timeout)? else {
            return Err(ToolError::TimedOut {
                tool,
                timeout: self.timeout,
            });
        };
        let stderr = join(stderr)?.unwrap_or_default();
        if !status.success() {
            return Err(ToolError::Failed {
                tool,
                status: status.to_string(),
                stderr: tail(&stderr),
            });
        }

        if let Err(err) = join(feeder) {
            if err.kind() != io::ErrorKind::BrokenPipe {
                return Err(err.into());
            }
        }
        join(sink)?;

        debug!(tool = %tool, elapsed_ms = started.elapsed().as_millis() as u64, "external tool finished");
        Ok(())
    }
}

impl Collaborators for ExternalTools {
    fn read_stats(&self, reads: &Path, report: &Path) -> Result<(), ToolError> {
        let mut command = Command::new(&self.paths.nanostat);
        command.arg("--fastq").arg(reads).arg("--tsv");
        self.run(command, None, Some(report))
    }

    fn filter_reads(&self, reads: &Path, output: &Path, params: &FilterParams) -> Result<(), ToolError> {
        let mut command = Command::new(&self.paths.nanofilt);
        command
            .arg("-q")
            .arg(params.min_quality.to_string())
            .arg("-l")
            .arg(params.min_length.to_string())
            .arg("--headcrop")
            .arg(params.head_crop.to_string())
            .arg("--tailcrop")
            .arg(params.tail_crop.to_string());
        self.run(command, Some(reads), Some(output))
    }

    fn consensus(&self, reads: &Path, reference: &Path, out_dir: &Path) -> Result<ConsensusOutputs, ToolError> {
        if out_dir.exists() {
            fs::remove_dir_all(out_dir)?;
        }
        let mut command = Command::new(&self.paths.medaka_consensus);
        command
            .arg("-i")
            .arg(reads)
            .arg("-d")
            .arg(reference)
            .arg("-o")
            .arg(out_dir)
            .arg("-t")
            .arg(self.threads.to_string())
            .arg("-m")
            .arg(&self.model);
        self.run(command, None, None)?;

        let outputs = ConsensusOutputs::in_dir(out_dir);
        for path in [&outputs.bam, &outputs.probs] {
            if !path.exists() {
                return Err(ToolError::MissingOutput {
                    tool: "medaka_consensus".to_string(),
                    path: path.clone(),
                });
            }
        }
        Ok(outputs)
    }

    fn depth(&self, bam: &Path, output: &Path) -> Result<(), ToolError> {
        let mut command = Command::new(&self.paths.samtools);
        command.args(["depth", "-aa", "-d0"]).arg(bam);
        self.run(command, None, Some(output))
    }

    fn call_variants(&self, consensus: &ConsensusOutputs, reference: &Path, output: &Path) -> Result<(), ToolError> {
        let unannotated = output.with_extension("unannotated.vcf");

        let mut call = Command::new(&self.paths.medaka);
        call.arg("variant").arg(reference).arg(&consensus.probs).arg(&unannotated);
        self.run(call, None, None)?;

        let mut annotate = Command::new(&self.paths.medaka);
        annotate
            .args(["tools", "annotate"])
            .arg(&unannotated)
            .arg(reference)
            .arg(&consensus.bam)
            .arg(output);
        self.run(annotate, None, None)?;

        fs::remove_file(&unannotated)?;
        Ok(())
    }

    fn apply_variants(&self, vcf: &Path, reference: &Path, output: &Path) -> Result<(), ToolError> {
        let mut compressed = vcf.as_os_str().to_owned();
        compressed.push(".gz");
        let compressed = PathBuf::from(compressed);

        let mut convert = Command::new(&self.paths.bcftools);
        convert.args(["convert", "-Oz", "-o"]).arg(&compressed).arg(vcf);
        self.run(convert, None, None)?;

        let mut index = Command::new(&self.paths.bcftools);
        index.args(["index", "-f"]).arg(&compressed);
        self.run(index, None, None)?;

        let mut apply = Command::new(&self.paths.bcftools);
        apply
            .arg("consensus")
            .arg(&compressed)
            .arg("-f")
            .arg(reference)
            .arg("-o")
            .arg(output);
        self.run(apply, None, None)?;

        let mut csi = compressed.as_os_str().to_owned();
        csi.push(".csi");
        for scratch in [compressed, PathBuf::from(csi)] {
            if scratch.exists() {
                fs::remove_file(scratch)?;
            }
        }
        Ok(())
    }

    fn align_pair(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        let mut command = Command::new(&self.paths.mafft);
        command.arg("--auto").arg(input);
        self.run(command, None, Some(output))
    }
}

fn tool_name(command: &Command) -> String {
    Path::new(command.get_program())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.get_program().to_string_lossy().into_owned())
}

fn feed_stdin(path: PathBuf, mut pipe: impl Write + Send + 'static) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        let mut reader = open_text(&path)?;
        io::copy(&mut reader, &mut pipe)?;
        pipe.flush()
    })
}

fn drain_stdout(mut pipe: impl Read + Send + 'static, file: File, gzip: bool) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        let writer = BufWriter::new(file);
        if gzip {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            io::copy(&mut pipe, &mut encoder)?;
            encoder.finish()?.flush()
        } else {
            let mut writer = writer;
            io::copy(&mut pipe, &mut writer)?;
            writer.flush()
        }
    })
}

fn join<T>(handle: Option<JoinHandle<io::Result<T>>>) -> io::Result<Option<T>> {
    match handle {
        None => Ok(None),
        Some(handle) => handle
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "pipe thread panicked"))?
            .map(Some),
    }
}

/// `Ok(None)` when the child was killed for exceeding `timeout`.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn tail(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn tools(timeout: Duration) -> ExternalTools {
        ExternalTools {
            paths: ToolPaths::default(),
            model: "m".to_string(),
            threads: 1,
            timeout,
        }
    }

    #[test]
    fn redirects_stdout_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut command = Command::new("sh");
        command.args(["-c", "printf 'mean_qual\\t9.5\\n'"]);
        tools(Duration::from_secs(30)).run(command, None, Some(&out)).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "mean_qual\t9.5\n");
    }

    #[test]
    fn gzip_stdin_is_decompressed_and_gz_stdout_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("reads.fastq");
        fs::write(&plain, "@r1\nACGT\n+\n!!!!\n").unwrap();
        let zipped = crate::genomics::gzip_file(&plain).unwrap();
        let out = dir.path().join("copy.fastq.gz");

        tools(Duration::from_secs(30))
            .run(Command::new("cat"), Some(&zipped), Some(&out))
            .unwrap();

        let mut text = String::new();
        open_text(&out).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "@r1\nACGT\n+\n!!!!\n");
    }

    #[test]
    fn non_zero_exit_reports_stderr() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo broken >&2; exit 3"]);
        let err = tools(Duration::from_secs(30)).run(command, None, None).unwrap_err();
        match err {
            ToolError::Failed { tool, stderr, .. } => {
                assert_eq!(tool, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn slow_tool_is_killed() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let err = tools(Duration::from_millis(200)).run(command, None, None).unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let command = Command::new("definitely-not-an-installed-tool");
        let err = tools(Duration::from_secs(1)).run(command, None, None).unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = "x".repeat(STDERR_TAIL) + "end";
        assert!(tail(&long).ends_with("end"));
        assert_eq!(tail(&long).len(), STDERR_TAIL);
    }
}
