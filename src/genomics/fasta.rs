use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

/// Header token marking the reference side of a pairwise alignment.
pub const REFERENCE_TAG: &str = "Reference";
/// Header token marking the sample side of a pairwise alignment.
pub const SAMPLE_TAG: &str = "Sample";

/// Errors raised while reading FASTA files or pairing alignment records.
#[derive(Debug, Error)]
pub enum FastaError {
    /// Sequence data before the first `>` header.
    #[error("line {0}: sequence data before the first '>' header")]
    MissingHeader(usize),
    /// Different numbers of reference and sample records.
    #[error("alignment has {references} reference record(s) but {samples} sample record(s)")]
    UnpairedRecords {
        /// Reference records found.
        references: usize,
        /// Sample records found.
        samples: usize,
    },
    /// Reference header carrying no locus identifier.
    #[error("reference record '{0}' does not name a locus")]
    MissingLocus(String),
    /// Aligned sequences of unequal length.
    #[error("locus '{locus}': aligned reference has {reference} columns but sample has {sample}")]
    LengthMismatch {
        /// Locus identifier.
        locus: String,
        /// Reference column count.
        reference: usize,
        /// Sample column count.
        sample: usize,
    },
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// FASTA record with its full header line (without `>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    /// Header text after `>`.
    pub header: String,
    /// Concatenated sequence lines.
    pub sequence: String,
}

impl FastaRecord {
    /// Construct a record.
    pub fn new(header: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            sequence: sequence.into(),
        }
    }

    /// First whitespace-delimited header token.
    pub fn id(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or("")
    }
}

/// Read every record, upper-casing soft-masked `acgt` bases.
pub fn read_fasta<R: BufRead>(reader: R) -> Result<Vec<FastaRecord>, FastaError> {
    let mut records: Vec<FastaRecord> = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            records.push(FastaRecord::new(header.trim(), String::new()));
        } else if !line.is_empty() {
            let record = records.last_mut().ok_or(FastaError::MissingHeader(idx + 1))?;
            record.sequence.extend(line.chars().map(|base| match base {
                'a' | 'c' | 'g' | 't' => base.to_ascii_uppercase(),
                other => other,
            }));
        }
    }
    Ok(records)
}

/// Read every record of a FASTA file.
pub fn read_fasta_path<P: AsRef<Path>>(path: P) -> Result<Vec<FastaRecord>, FastaError> {
    read_fasta(BufReader::new(File::open(path)?))
}

/// Write records with one sequence line each.
pub fn write_fasta<W: Write>(writer: &mut W, records: &[FastaRecord]) -> std::io::Result<()> {
    for record in records {
        writeln!(writer, ">{}", record.header)?;
        writeln!(writer, "{}", record.sequence)?;
    }
    writer.flush()
}

/// Write records to a file path.
pub fn write_fasta_path<P: AsRef<Path>>(path: P, records: &[FastaRecord]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_fasta(&mut writer, records)
}

/// Write the two-record input handed to the pairwise aligner, tagging each
/// header so the aligned output can be paired again.
pub fn write_pairwise_input<P: AsRef<Path>>(
    path: P,
    reference: &FastaRecord,
    sample: &FastaRecord,
) -> std::io::Result<()> {
    write_fasta_path(
        path,
        &[
            FastaRecord::new(format!("{REFERENCE_TAG} {}", reference.header), reference.sequence.clone()),
            FastaRecord::new(format!("{SAMPLE_TAG} {}", sample.header), sample.sequence.clone()),
        ],
    )
}

/// Reference and sample rows of one locus's pairwise alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentPair {
    /// Locus identifier taken from the reference header.
    pub locus_id: Arc<str>,
    /// Aligned reference row; `-` marks a gap.
    pub reference: Vec<u8>,
    /// Aligned sample row; `-` marks a gap.
    pub sample: Vec<u8>,
}

impl AlignmentPair {
    /// Build a pair, checking both rows have the same number of columns.
    pub fn new(
        locus_id: impl Into<Arc<str>>,
        reference: impl Into<Vec<u8>>,
        sample: impl Into<Vec<u8>>,
    ) -> Result<Self, FastaError> {
        let locus_id = locus_id.into();
        let reference = reference.into();
        let sample = sample.into();
        if reference.len() != sample.len() {
            return Err(FastaError::LengthMismatch {
                locus: locus_id.to_string(),
                reference: reference.len(),
                sample: sample.len(),
            });
        }
        Ok(Self {
            locus_id,
            reference,
            sample,
        })
    }

    /// Number of alignment columns.
    pub fn columns(&self) -> usize {
        self.reference.len()
    }
}

/// Pair aligned records whose first header token is exactly `Reference` or
/// `Sample`.
///
/// The n-th reference record pairs with the n-th sample record; the locus id
/// is the second token of the reference header.
pub fn pair_alignments(records: &[FastaRecord]) -> Result<Vec<AlignmentPair>, FastaError> {
    let references: Vec<&FastaRecord> = records
        .iter()
        .filter(|r| tag_of(&r.header) == Some(REFERENCE_TAG))
        .collect();
    let samples: Vec<&FastaRecord> = records
        .iter()
        .filter(|r| tag_of(&r.header) == Some(SAMPLE_TAG))
        .collect();
    if references.len() != samples.len() {
        return Err(FastaError::UnpairedRecords {
            references: references.len(),
            samples: samples.len(),
        });
    }

    references
        .into_iter()
        .zip(samples)
        .map(|(reference, sample)| {
            let locus = locus_from_header(&reference.header)
                .ok_or_else(|| FastaError::MissingLocus(reference.header.clone()))?;
            AlignmentPair::new(
                locus,
                reference.sequence.clone().into_bytes(),
                sample.sequence.clone().into_bytes(),
            )
        })
        .collect()
}

fn tag_of(header: &str) -> Option<&str> {
    header.split_whitespace().next()
}

fn locus_from_header(header: &str) -> Option<&str> {
    header.split_whitespace().nth(1)
}
