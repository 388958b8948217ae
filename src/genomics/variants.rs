use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::regions::{BadRegionIndex, RegionKey};

/// Minimum number of tab-separated columns in a data line.
const MIN_FIELDS: usize = 8;
/// Column holding the `key=value;...` annotation block.
const INFO_COLUMN: usize = 7;
/// Decimal places kept for reported frequencies.
const FREQUENCY_DECIMALS: i32 = 3;

/// Classification of a variant from its allele lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VariantType {
    /// Single-base substitution.
    #[serde(rename = "SNP")]
    Snp,
    /// Alternate allele longer than reference.
    Insertion,
    /// Reference allele longer than alternate.
    Deletion,
    /// Equal-length multi-base substitution.
    Other,
}

impl VariantType {
    /// Classify a reference/alternate allele pair.
    pub fn classify(reference: &str, alternate: &str) -> Self {
        let (ref_len, alt_len) = (reference.len(), alternate.len());
        if alt_len > ref_len {
            Self::Insertion
        } else if ref_len > alt_len {
            Self::Deletion
        } else if ref_len == 1 {
            Self::Snp
        } else {
            Self::Other
        }
    }

    /// Label used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snp => "SNP",
            Self::Insertion => "Insertion",
            Self::Deletion => "Deletion",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while reading a variant stream.
#[derive(Debug, Error)]
pub enum VariantParseError {
    /// Data line with fewer than eight columns.
    #[error("line {line}: expected at least 8 tab-separated fields, found {found}")]
    TooFewFields {
        /// 1-based line number.
        line: usize,
        /// Number of columns present.
        found: usize,
    },
    /// Annotation key absent from the INFO column.
    #[error("line {line}: INFO column has no '{key}' entry")]
    MissingInfo {
        /// 1-based line number.
        line: usize,
        /// Missing key.
        key: &'static str,
    },
    /// Annotation value with too few components.
    #[error("line {line}: '{key}' needs at least {expected} values, found {found}")]
    TooFewValues {
        /// 1-based line number.
        line: usize,
        /// Annotation key.
        key: &'static str,
        /// Required component count.
        expected: usize,
        /// Components present.
        found: usize,
    },
    /// Number that failed to parse.
    #[error("line {line}: invalid {field} value '{value}'")]
    InvalidNumber {
        /// 1-based line number.
        line: usize,
        /// Field or annotation key.
        field: &'static str,
        /// Raw text.
        value: String,
    },
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed data line of a variant stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    /// Locus (contig) the variant sits on.
    pub locus_id: Arc<str>,
    /// 1-based reference coordinate.
    pub position: u64,
    /// Reference allele.
    pub reference_allele: String,
    /// Alternate allele.
    pub alternate_allele: String,
    /// Strand-resolved support counts (`SR`).
    pub support_ratio: [f64; 4],
    /// Ambiguous-read depths (`AR`).
    pub ambiguous_read_depth: Vec<f64>,
    /// Depth across the variant span (`DPSP`).
    pub span_depth: f64,
    /// Total depth (`DP`).
    pub total_depth: f64,
}

impl VariantRecord {
    /// Parse a tab-separated data line. `line_no` is 1-based and only used in errors.
    pub fn parse(line: &str, line_no: usize) -> Result<Self, VariantParseError> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if fields.len() < MIN_FIELDS {
            return Err(VariantParseError::TooFewFields {
                line: line_no,
                found: fields.len(),
            });
        }

        let position = fields[1]
            .trim()
            .parse::<u64>()
            .map_err(|_| VariantParseError::InvalidNumber {
                line: line_no,
                field: "POS",
                value: fields[1].to_string(),
            })?;

        let info = InfoBlock::new(fields[INFO_COLUMN], line_no);
        let sr = info.floats("SR")?;
        if sr.len() < 4 {
            return Err(VariantParseError::TooFewValues {
                line: line_no,
                key: "SR",
                expected: 4,
                found: sr.len(),
            });
        }
        let ambiguous_read_depth = info.floats("AR")?;
        if ambiguous_read_depth.is_empty() {
            return Err(VariantParseError::TooFewValues {
                line: line_no,
                key: "AR",
                expected: 1,
                found: 0,
            });
        }

        Ok(Self {
            locus_id: Arc::from(fields[0]),
            position,
            reference_allele: fields[3].to_string(),
            alternate_allele: fields[4].to_string(),
            support_ratio: [sr[0], sr[1], sr[2], sr[3]],
            ambiguous_read_depth,
            span_depth: info.float("DPSP")?,
            total_depth: info.float("DP")?,
        })
    }

    /// Fraction of informative reads supporting the alternate allele.
    ///
    /// `(SR[2] + SR[3]) / (DPSP - sum(AR))`, or exactly 0 when the
    /// denominator is not positive.
    pub fn frequency(&self) -> f64 {
        let denominator = self.span_depth - self.ambiguous_read_depth.iter().sum::<f64>();
        if denominator > 0.0 {
            (self.support_ratio[2] + self.support_ratio[3]) / denominator
        } else {
            0.0
        }
    }

    /// Frequency rounded to three decimals, as reported and thresholded.
    pub fn rounded_frequency(&self) -> f64 {
        round_to(self.frequency(), FREQUENCY_DECIMALS)
    }

    /// Allele-length classification.
    pub fn variant_type(&self) -> VariantType {
        VariantType::classify(&self.reference_allele, &self.alternate_allele)
    }

    /// Absolute allele-length difference.
    pub fn indel_magnitude(&self) -> usize {
        self.alternate_allele.len().abs_diff(self.reference_allele.len())
    }

    /// `REF-->ALT` label.
    pub fn mutation_label(&self) -> String {
        format!("{}-->{}", self.reference_allele, self.alternate_allele)
    }

    /// Structured position key.
    pub fn key(&self) -> RegionKey {
        RegionKey::new(Arc::clone(&self.locus_id), self.position)
    }
}

struct InfoBlock<'a> {
    raw: &'a str,
    line: usize,
}

impl<'a> InfoBlock<'a> {
    fn new(raw: &'a str, line: usize) -> Self {
        Self { raw, line }
    }

    fn value(&self, key: &'static str) -> Result<&'a str, VariantParseError> {
        self.raw
            .split(';')
            .filter_map(|entry| entry.split_once('='))
            .find(|(k, _)| k.trim() == key)
            .map(|(_, v)| v.trim())
            .ok_or(VariantParseError::MissingInfo {
                line: self.line,
                key,
            })
    }

    fn float(&self, key: &'static str) -> Result<f64, VariantParseError> {
        let raw = self.value(key)?;
        parse_float(raw, key, self.line)
    }

    fn floats(&self, key: &'static str) -> Result<Vec<f64>, VariantParseError> {
        self.value(key)?
            .split(',')
            .filter(|v| !v.trim().is_empty())
            .map(|v| parse_float(v.trim(), key, self.line))
            .collect()
    }
}

fn parse_float(raw: &str, field: &'static str, line: usize) -> Result<f64, VariantParseError> {
    raw.parse().map_err(|_| VariantParseError::InvalidNumber {
        line,
        field,
        value: raw.to_string(),
    })
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Acceptance thresholds applied by [`VariantStream::refine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinePolicy {
    /// Minimum total depth (`DP`).
    pub coverage_cutoff: f64,
    /// Minimum rounded frequency.
    pub min_frequency: f64,
    /// Maximum allele-length difference.
    pub max_indel: usize,
}

impl RefinePolicy {
    /// Whether a record passes every threshold and lies outside bad regions.
    pub fn accepts(&self, record: &VariantRecord, regions: &BadRegionIndex) -> bool {
        record.total_depth >= self.coverage_cutoff
            && !regions.contains(&record.locus_id, record.position)
            && record.rounded_frequency() >= self.min_frequency
            && record.indel_magnitude() <= self.max_indel
    }
}

/// Per-variant fields reported for a (refined) stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantSummary {
    /// 1-based position.
    pub position: u64,
    /// `REF-->ALT` label.
    pub mutation: String,
    /// Frequency rounded to three decimals.
    pub frequency: f64,
    /// Allele-length classification.
    pub variant_type: VariantType,
    /// Locus identifier.
    pub locus_id: Arc<str>,
    /// Total depth (`DP`).
    pub total_depth: f64,
}

impl From<&VariantRecord> for VariantSummary {
    fn from(record: &VariantRecord) -> Self {
        Self {
            position: record.position,
            mutation: record.mutation_label(),
            frequency: record.rounded_frequency(),
            variant_type: record.variant_type(),
            locus_id: Arc::clone(&record.locus_id),
            total_depth: record.total_depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StreamLine {
    Header(String),
    Record { raw: String, record: VariantRecord },
}

/// Variant file held in memory: header lines verbatim plus parsed data lines.
///
/// Data lines keep their original text so that refinement rewrites exactly
/// the retained input lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantStream {
    lines: Vec<StreamLine>,
}

/// Counts produced by a refinement pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefineStats {
    /// Data lines read.
    pub examined: usize,
    /// Data lines kept.
    pub retained: usize,
}

impl VariantStream {
    /// Parse a stream; lines starting with `#` are headers, blank lines are dropped.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, VariantParseError> {
        let mut lines = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.starts_with('#') {
                lines.push(StreamLine::Header(line.to_string()));
            } else if !line.trim().is_empty() {
                let record = VariantRecord::parse(line, idx + 1)?;
                lines.push(StreamLine::Record {
                    raw: line.to_string(),
                    record,
                });
            }
        }
        Ok(Self { lines })
    }

    /// Parse a stream from a file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, VariantParseError> {
        let reader = BufReader::new(File::open(path)?);
        Self::parse(reader)
    }

    /// Parsed data records in stream order.
    pub fn records(&self) -> impl Iterator<Item = &VariantRecord> {
        self.lines.iter().filter_map(|line| match line {
            StreamLine::Record { record, .. } => Some(record),
            StreamLine::Header(_) => None,
        })
    }

    /// Number of data records.
    pub fn len(&self) -> usize {
        self.records().count()
    }

    /// Whether the stream has no data records.
    pub fn is_empty(&self) -> bool {
        self.records().next().is_none()
    }

    /// Report fields for every data record, in stream order, without filtering.
    pub fn extract(&self) -> Vec<VariantSummary> {
        self.records().map(VariantSummary::from).collect()
    }

    /// Keep all headers and the data lines accepted by `policy`.
    pub fn refine(&self, policy: &RefinePolicy, regions: &BadRegionIndex) -> (Self, RefineStats) {
        let mut stats = RefineStats::default();
        let lines = self
            .lines
            .iter()
            .filter(|line| match line {
                StreamLine::Header(_) => true,
                StreamLine::Record { record, .. } => {
                    stats.examined += 1;
                    let keep = policy.accepts(record, regions);
                    if keep {
                        stats.retained += 1;
                    }
                    keep
                }
            })
            .cloned()
            .collect();
        (Self { lines }, stats)
    }

    /// Write headers and data lines, one per line.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for line in &self.lines {
            let text = match line {
                StreamLine::Header(text) => text,
                StreamLine::Record { raw, .. } => raw,
            };
            writer.write_all(text.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

/// Refine a variant file in place.
///
/// The refined stream is written to a sibling file which then replaces the
/// original, so a failure part-way leaves the input untouched.
pub fn refine_file<P: AsRef<Path>>(
    path: P,
    policy: &RefinePolicy,
    regions: &BadRegionIndex,
) -> Result<(VariantStream, RefineStats), VariantParseError> {
    let path = path.as_ref();
    let stream = VariantStream::from_path(path)?;
    let (refined, stats) = stream.refine(policy, regions);

    let mut staging = path.as_os_str().to_owned();
    staging.push(".refining");
    {
        let mut writer = BufWriter::new(File::create(&staging)?);
        refined.write_to(&mut writer)?;
    }
    fs::rename(&staging, path)?;

    debug!(
        path = %path.display(),
        examined = stats.examined,
        retained = stats.retained,
        "refined variant file"
    );
    Ok((refined, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const HEADER: &str = "##fileformat=VCFv4.1\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO";

    fn line(locus: &str, pos: u64, r: &str, a: &str, sr: &str, ar: &str, dpsp: u32, dp: u32) -> String {
        format!("{locus}\t{pos}\t.\t{r}\t{a}\t30.0\tPASS\tAR={ar};DP={dp};DPS=10,10;DPSP={dpsp};SR={sr}")
    }

    #[test_case("A", "G" => VariantType::Snp ; "single base")]
    #[test_case("A", "AT" => VariantType::Insertion ; "insertion")]
    #[test_case("ATG", "A" => VariantType::Deletion ; "deletion")]
    #[test_case("AT", "GC" => VariantType::Other ; "multi base substitution")]
    fn classifies_by_allele_length(r: &str, a: &str) -> VariantType {
        VariantType::classify(r, a)
    }

    #[test]
    fn parses_record_and_derives_metrics() {
        let text = line("MN908947", 241, "C", "T", "0,1,40,45", "1,2", 100, 98);
        let record = VariantRecord::parse(&text, 3).unwrap();
        assert_eq!(record.locus_id.as_ref(), "MN908947");
        assert_eq!(record.position, 241);
        assert!((record.frequency() - 85.0 / 97.0).abs() < 1e-12);
        assert_eq!(record.rounded_frequency(), 0.876);
        assert_eq!(record.indel_magnitude(), 0);
        assert_eq!(record.mutation_label(), "C-->T");
    }

    #[test]
    fn non_positive_denominator_gives_zero_frequency() {
        let text = line("1", 5, "A", "G", "0,0,4,4", "6,4", 10, 50);
        let record = VariantRecord::parse(&text, 1).unwrap();
        assert_eq!(record.frequency(), 0.0);
    }

    #[test]
    fn missing_annotation_is_reported_with_line() {
        let text = "1\t5\t.\tA\tG\t1\tPASS\tDP=3;DPSP=3;AR=0";
        let err = VariantRecord::parse(text, 7).unwrap_err();
        assert!(matches!(err, VariantParseError::MissingInfo { line: 7, key: "SR" }));
    }

    #[test]
    fn short_line_is_rejected() {
        let err = VariantRecord::parse("1\t5\t.\tA", 2).unwrap_err();
        assert!(matches!(err, VariantParseError::TooFewFields { line: 2, found: 4 }));
    }

    #[test]
    fn refine_applies_every_threshold() {
        let text = [
            HEADER.to_string(),
            line("1", 10, "A", "G", "0,0,45,45", "0", 100, 100), // kept
            line("1", 20, "A", "G", "0,0,45,45", "0", 100, 20),  // low depth
            line("1", 30, "A", "G", "0,0,20,20", "0", 100, 100), // low frequency
            line("1", 40, "A", "AGGGG", "0,0,45,45", "0", 100, 100), // indel too long
            line("2", 11, "C", "T", "0,0,45,45", "0", 100, 100), // bad region
            line("2", 50, "C", "T", "0,0,45,45", "0", 100, 100), // kept
        ]
        .join("\n");
        let stream = VariantStream::parse(text.as_bytes()).unwrap();
        let policy = RefinePolicy {
            coverage_cutoff: 30.0,
            min_frequency: 0.8,
            max_indel: 3,
        };
        let regions = BadRegionIndex::parse("2:10-12").unwrap();

        let (refined, stats) = stream.refine(&policy, &regions);
        assert_eq!(stats, RefineStats { examined: 6, retained: 2 });
        let kept: Vec<u64> = refined.records().map(|r| r.position).collect();
        assert_eq!(kept, vec![10, 50]);

        let mut out = Vec::new();
        refined.write_to(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("##fileformat=VCFv4.1\n#CHROM"));
        assert_eq!(out.lines().count(), 4);
    }

    #[test]
    fn extract_preserves_order_and_fields() {
        let text = [
            HEADER.to_string(),
            line("2", 9, "T", "TA", "0,0,9,9", "0", 20, 20),
            line("1", 3, "G", "A", "0,0,5,4", "1", 10, 12),
        ]
        .join("\n");
        let stream = VariantStream::parse(text.as_bytes()).unwrap();
        let summaries = stream.extract();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].locus_id.as_ref(), "2");
        assert_eq!(summaries[0].variant_type, VariantType::Insertion);
        assert_eq!(summaries[0].frequency, 0.9);
        assert_eq!(summaries[1].mutation, "G-->A");
        assert_eq!(summaries[1].frequency, 1.0);
        assert_eq!(summaries[1].total_depth, 12.0);
    }
}
