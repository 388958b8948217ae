use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use super::io::open_text;

/// Errors raised while reading a per-base depth track.
#[derive(Debug, Error)]
pub enum DepthParseError {
    /// Row with fewer than three columns.
    #[error("line {line}: expected 'locus<TAB>position<TAB>depth'")]
    TooFewFields {
        /// 1-based line number.
        line: usize,
    },
    /// Position or depth that is not a non-negative number.
    #[error("line {line}: invalid {field} '{value}'")]
    InvalidNumber {
        /// 1-based line number.
        line: usize,
        /// Column name.
        field: &'static str,
        /// Raw text.
        value: String,
    },
    /// Position that does not follow the previous row of the same locus.
    #[error("line {line}: locus '{locus}' jumps from position {expected} to {found}")]
    Discontiguous {
        /// 1-based line number.
        line: usize,
        /// Locus identifier.
        locus: String,
        /// Position the row should have had.
        expected: u64,
        /// Position found.
        found: u64,
    },
    /// Locus that reappears after rows of another locus.
    #[error("line {line}: locus '{locus}' reappears after other loci")]
    LocusRevisited {
        /// 1-based line number.
        line: usize,
        /// Locus identifier.
        locus: String,
    },
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contiguous per-base depths for one locus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocusDepth {
    /// Locus identifier.
    pub locus_id: Arc<str>,
    /// 1-based position of the first depth entry.
    pub start: u64,
    /// One depth per reference base.
    pub depths: Vec<u32>,
}

impl LocusDepth {
    /// Number of positions covered.
    pub fn len(&self) -> usize {
        self.depths.len()
    }

    /// Whether the locus has no positions.
    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    /// Depth at a 1-based position, if covered.
    pub fn depth_at(&self, position: u64) -> Option<u32> {
        let offset = position.checked_sub(self.start)?;
        self.depths.get(usize::try_from(offset).ok()?).copied()
    }

    /// `(position, depth)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.depths
            .iter()
            .enumerate()
            .map(move |(offset, &depth)| (self.start + offset as u64, depth))
    }

    /// Last covered position.
    pub fn end(&self) -> u64 {
        self.start + self.depths.len().saturating_sub(1) as u64
    }
}

/// Depth track for every locus, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepthTrack {
    loci: Vec<LocusDepth>,
    index: HashMap<Arc<str>, usize>,
}

impl DepthTrack {
    /// Parse `locus<TAB>position<TAB>depth` rows in one pass.
    ///
    /// A new locus starts whenever the locus column changes between rows.
    /// Depths written as decimals are truncated.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, DepthParseError> {
        let mut track = Self::default();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let (Some(locus), Some(position), Some(depth)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(DepthParseError::TooFewFields { line: line_no });
            };
            let position = parse_count(position, "position", line_no)?;
            let depth = parse_count(depth, "depth", line_no)?;
            track.push(locus.trim(), position, depth, line_no)?;
        }

        Ok(track)
    }

    /// Parse a depth file, plain or gzip-compressed.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DepthParseError> {
        Self::parse(open_text(path)?)
    }

    fn push(&mut self, locus: &str, position: u64, depth: u64, line: usize) -> Result<(), DepthParseError> {
        let depth = u32::try_from(depth).unwrap_or(u32::MAX);
        if let Some(current) = self.loci.last_mut() {
            if current.locus_id.as_ref() == locus {
                let expected = current.start + current.depths.len() as u64;
                if position != expected {
                    return Err(DepthParseError::Discontiguous {
                        line,
                        locus: locus.to_string(),
                        expected,
                        found: position,
                    });
                }
                current.depths.push(depth);
                return Ok(());
            }
        }

        if self.index.contains_key(locus) {
            return Err(DepthParseError::LocusRevisited {
                line,
                locus: locus.to_string(),
            });
        }
        let locus_id: Arc<str> = Arc::from(locus);
        self.index.insert(Arc::clone(&locus_id), self.loci.len());
        self.loci.push(LocusDepth {
            locus_id,
            start: position,
            depths: vec![depth],
        });
        Ok(())
    }

    /// Depths for a locus.
    pub fn locus(&self, locus_id: &str) -> Option<&LocusDepth> {
        self.index.get(locus_id).map(|&idx| &self.loci[idx])
    }

    /// All loci in file order.
    pub fn loci(&self) -> &[LocusDepth] {
        &self.loci
    }

    /// Locus identifiers in file order.
    pub fn locus_ids(&self) -> impl Iterator<Item = &Arc<str>> {
        self.loci.iter().map(|locus| &locus.locus_id)
    }

    /// Total number of positions across loci.
    pub fn total_positions(&self) -> usize {
        self.loci.iter().map(LocusDepth::len).sum()
    }

    /// Mean depth over every position, `None` for an empty track.
    pub fn mean_depth(&self) -> Option<f64> {
        let count = self.total_positions();
        if count == 0 {
            return None;
        }
        let sum: u64 = self
            .loci
            .iter()
            .flat_map(|locus| locus.depths.iter())
            .map(|&d| u64::from(d))
            .sum();
        Some(sum as f64 / count as f64)
    }

    /// Largest position seen on any locus.
    pub fn max_position(&self) -> u64 {
        self.loci.iter().map(LocusDepth::end).max().unwrap_or(0)
    }
}

fn parse_count(raw: &str, field: &'static str, line: usize) -> Result<u64, DepthParseError> {
    let raw = raw.trim();
    let invalid = || DepthParseError::InvalidNumber {
        line,
        field,
        value: raw.to_string(),
    };
    if let Ok(value) = raw.parse::<u64>() {
        return Ok(value);
    }
    let value: f64 = raw.parse().map_err(|_| invalid())?;
    if value.is_finite() && value >= 0.0 {
        Ok(value.trunc() as u64)
    } else {
        Err(invalid())
    }
}
