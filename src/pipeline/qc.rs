use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Errors raised while reading a read-statistics report.
#[derive(Debug, Error)]
pub enum QcError {
    /// Statistic absent from the report.
    #[error("read statistics report has no '{0}' entry")]
    MissingStatistic(&'static str),
    /// Statistic that is not a number.
    #[error("read statistic '{key}' has non-numeric value '{value}'")]
    InvalidStatistic {
        /// Statistic name.
        key: &'static str,
        /// Raw text.
        value: String,
    },
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Summary statistics of a read set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReadStats {
    /// Mean read length.
    pub mean_read_length: f64,
    /// Read length standard deviation.
    pub read_length_stdev: f64,
    /// Mean read quality.
    pub mean_quality: f64,
    /// Number of reads.
    pub number_of_reads: u64,
    /// Number of bases.
    pub number_of_bases: u64,
}

impl ReadStats {
    /// Parse a `key<TAB>value` statistics report.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, QcError> {
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if let Some((key, value)) = line.split_once('\t') {
                entries.push((key.trim().to_string(), value.trim().to_string()));
            }
        }
        let lookup = |key: &'static str| -> Result<f64, QcError> {
            let (_, raw) = entries
                .iter()
                .find(|(k, _)| k == key)
                .ok_or(QcError::MissingStatistic(key))?;
            raw.replace(',', "")
                .parse()
                .map_err(|_| QcError::InvalidStatistic {
                    key,
                    value: raw.clone(),
                })
        };

        Ok(Self {
            mean_read_length: lookup("mean_read_length")?,
            read_length_stdev: lookup("read_length_stdev")?,
            mean_quality: lookup("mean_qual")?,
            number_of_reads: lookup("number_of_reads")?.max(0.0) as u64,
            number_of_bases: lookup("number_of_bases")?.max(0.0) as u64,
        })
    }

    /// Parse a report file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, QcError> {
        Self::parse(BufReader::new(File::open(path)?))
    }
}

/// Why a read set failed QC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectionReason {
    /// The read set is empty.
    NoReads,
    /// Fewer reads than required.
    TooFewReads {
        /// Reads found.
        found: u64,
        /// Reads required.
        required: u64,
    },
    /// Typical read too short once cropped.
    FragmentTooShort {
        /// `mean - stdev - head_crop - tail_crop`.
        effective: f64,
        /// Length the effective fragment must exceed.
        required: u32,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReads => write!(f, "no reads"),
            Self::TooFewReads { found, required } => {
                write!(f, "{found} reads, {required} required")
            }
            Self::FragmentTooShort { effective, required } => {
                write!(f, "effective fragment length {effective:.1} not above {required}")
            }
        }
    }
}

/// Outcome of a QC probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QcVerdict {
    /// Read set may proceed.
    Pass,
    /// Read set is rejected.
    Reject(RejectionReason),
}

/// Read-count and fragment-length gate applied to each QC probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QcGate {
    /// Minimum number of reads.
    pub min_reads: u64,
    /// Bases cropped from the read start.
    pub head_crop: u32,
    /// Bases cropped from the read end.
    pub tail_crop: u32,
    /// Length the effective fragment must exceed.
    pub min_read_length: u32,
}

impl QcGate {
    /// `mean_length - length_stdev - head_crop - tail_crop`.
    pub fn effective_fragment_length(&self, stats: &ReadStats) -> f64 {
        stats.mean_read_length
            - stats.read_length_stdev
            - f64::from(self.head_crop)
            - f64::from(self.tail_crop)
    }

    /// Decide whether a read set may proceed.
    pub fn evaluate(&self, stats: &ReadStats) -> QcVerdict {
        if stats.number_of_reads == 0 {
            return QcVerdict::Reject(RejectionReason::NoReads);
        }
        if stats.number_of_reads < self.min_reads {
            return QcVerdict::Reject(RejectionReason::TooFewReads {
                found: stats.number_of_reads,
                required: self.min_reads,
            });
        }
        let effective = self.effective_fragment_length(stats);
        if effective <= f64::from(self.min_read_length) {
            return QcVerdict::Reject(RejectionReason::FragmentTooShort {
                effective,
                required: self.min_read_length,
            });
        }
        QcVerdict::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const REPORT: &str = "Metrics\tdataset\n\
        number_of_reads\t1520\n\
        number_of_bases\t1,824,000.0\n\
        median_read_length\t1190.0\n\
        mean_read_length\t1200.0\n\
        read_length_stdev\t310.5\n\
        mean_qual\t11.2\n";

    fn gate() -> QcGate {
        QcGate {
            min_reads: 100,
            head_crop: 70,
            tail_crop: 70,
            min_read_length: 50,
        }
    }

    #[test]
    fn parses_statistics_report() {
        let stats = ReadStats::parse(REPORT.as_bytes()).unwrap();
        assert_eq!(stats.number_of_reads, 1520);
        assert_eq!(stats.number_of_bases, 1_824_000);
        assert_eq!(stats.mean_read_length, 1200.0);
        assert_eq!(stats.mean_quality, 11.2);
    }

    #[test]
    fn missing_statistic_is_an_error() {
        let err = ReadStats::parse("number_of_reads\t3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, QcError::MissingStatistic("mean_read_length")));
    }

    #[test_case(50, 1200.0, 300.0 => QcVerdict::Reject(RejectionReason::TooFewReads { found: 50, required: 100 }) ; "too few reads")]
    #[test_case(0, 0.0, 0.0 => QcVerdict::Reject(RejectionReason::NoReads) ; "empty read set")]
    #[test_case(500, 240.0, 50.0 => QcVerdict::Reject(RejectionReason::FragmentTooShort { effective: 50.0, required: 50 }) ; "fragment at limit")]
    #[test_case(500, 1200.0, 300.0 => QcVerdict::Pass ; "healthy sample")]
    fn gate_verdicts(reads: u64, mean: f64, stdev: f64) -> QcVerdict {
        let stats = ReadStats {
            mean_read_length: mean,
            read_length_stdev: stdev,
            number_of_reads: reads,
            ..ReadStats::default()
        };
        gate().evaluate(&stats)
    }
}
