use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

/// Value accepted in place of an interval list meaning "no regions".
pub const NO_REGIONS: &str = "none";

/// Largest number of positions a single `locus:start-end` token may cover.
pub const MAX_REGION_SPAN: u64 = 10_000_000;

/// Position on a named locus (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey {
    /// Locus (contig) identifier.
    pub locus_id: Arc<str>,
    /// 1-based reference coordinate.
    pub position: u64,
}

impl RegionKey {
    /// Construct a key for a locus position.
    pub fn new(locus_id: impl Into<Arc<str>>, position: u64) -> Self {
        Self {
            locus_id: locus_id.into(),
            position,
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.locus_id, self.position)
    }
}

/// Errors raised while parsing a `locus:start-end;...` interval list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionSpecError {
    /// Token without a `locus:` prefix.
    #[error("region '{0}' is missing the 'locus:' prefix")]
    MissingLocus(String),
    /// Token without a `start-end` range.
    #[error("region '{0}' is missing a 'start-end' range")]
    MissingRange(String),
    /// Bound that is not a number.
    #[error("region '{token}' has a non-numeric bound '{bound}'")]
    InvalidBound {
        /// The offending token.
        token: String,
        /// The bound that failed to parse.
        bound: String,
    },
    /// Range whose start lies after its end.
    #[error("region '{0}' has start after end")]
    Inverted(String),
    /// Range covering more positions than [`MAX_REGION_SPAN`].
    #[error("region '{token}' spans {span} positions, more than the limit of {max}")]
    SpanTooLarge {
        /// The offending token.
        token: String,
        /// Positions covered by the range.
        span: u64,
        /// Largest accepted span.
        max: u64,
    },
}

/// Set of positions excluded from variant acceptance and consensus masking.
///
/// Built once per run and shared read-only across samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadRegionIndex {
    keys: HashSet<RegionKey>,
}

impl BadRegionIndex {
    /// Index that excludes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse an interval list, failing on the first malformed token.
    ///
    /// Each `locus:start-end` token expands to every position in the
    /// inclusive range. Duplicate positions collapse.
    pub fn parse(spec: &str) -> Result<Self, RegionSpecError> {
        let spec = spec.trim();
        if is_sentinel(spec) {
            return Ok(Self::empty());
        }

        let mut keys = HashSet::new();
        for token in spec.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (locus, start, end) = parse_token(token)?;
            let locus: Arc<str> = Arc::from(locus);
            keys.extend((start..=end).map(|pos| RegionKey::new(Arc::clone(&locus), pos)));
        }
        Ok(Self { keys })
    }

    /// Parse an interval list, treating any malformed token as "no regions".
    pub fn parse_lenient(spec: &str) -> Self {
        match Self::parse(spec) {
            Ok(index) => index,
            Err(err) => {
                warn!(%err, "ignoring malformed bad-region specification");
                Self::empty()
            }
        }
    }

    /// Whether the position is excluded.
    pub fn contains(&self, locus_id: &str, position: u64) -> bool {
        !self.keys.is_empty() && self.keys.contains(&RegionKey::new(locus_id, position))
    }

    /// Number of excluded positions.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over excluded positions in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &RegionKey> {
        self.keys.iter()
    }
}

fn is_sentinel(spec: &str) -> bool {
    spec.is_empty() || spec.eq_ignore_ascii_case(NO_REGIONS)
}

fn parse_token(token: &str) -> Result<(&str, u64, u64), RegionSpecError> {
    let (locus, range) = token
        .split_once(':')
        .ok_or_else(|| RegionSpecError::MissingLocus(token.to_string()))?;
    let locus = locus.trim();
    if locus.is_empty() {
        return Err(RegionSpecError::MissingLocus(token.to_string()));
    }
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| RegionSpecError::MissingRange(token.to_string()))?;
    let start = parse_bound(token, start)?;
    let end = parse_bound(token, end)?;
    if start > end {
        return Err(RegionSpecError::Inverted(token.to_string()));
    }
    let span = end - start + 1;
    if span > MAX_REGION_SPAN {
        return Err(RegionSpecError::SpanTooLarge {
            token: token.to_string(),
            span,
            max: MAX_REGION_SPAN,
        });
    }
    Ok((locus, start, end))
}

// Bounds such as "10.0" are accepted and truncated.
fn parse_bound(token: &str, bound: &str) -> Result<u64, RegionSpecError> {
    let trimmed = bound.trim();
    let invalid = || RegionSpecError::InvalidBound {
        token: token.to_string(),
        bound: trimmed.to_string(),
    };
    if let Ok(value) = trimmed.parse::<u64>() {
        return Ok(value);
    }
    let value: f64 = trimmed.parse().map_err(|_| invalid())?;
    if value.is_finite() && value >= 0.0 {
        Ok(value.trunc() as u64)
    } else {
        Err(invalid())
    }
}
