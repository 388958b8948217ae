//! Coverage masking of a consensus sequence through its alignment to the
//! reference.
//!
//! Depth is recorded per reference base while the alignment has one column
//! per aligned position, so the masker walks each alignment with a depth
//! cursor that only advances on non-gap reference columns.

use std::collections::BTreeSet;
use std::ops::AddAssign;
use std::sync::Arc;

use thiserror::Error;

use super::depth::{DepthTrack, LocusDepth};
use super::fasta::{AlignmentPair, FastaRecord};
use super::regions::BadRegionIndex;
use super::variants::round_to;

/// Symbol written in place of a low-confidence base.
pub const MASK_BASE: u8 = b'N';
/// Alignment gap symbol.
pub const GAP: u8 = b'-';

/// Errors raised while masking an alignment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskingError {
    /// Column where both rows are gaps.
    #[error("locus '{locus}': alignment column {column} is a gap in both sequences")]
    GapOnlyColumn {
        /// Locus identifier.
        locus: String,
        /// 0-based alignment column.
        column: usize,
    },
    /// Locus with an empty depth series.
    #[error("locus '{0}' has no depth entries")]
    MissingDepth(String),
    /// Alignment and depth track cover different loci.
    #[error("alignment and depth track disagree on loci (alignment only: {alignment_only:?}, depth only: {depth_only:?})")]
    LocusMismatch {
        /// Loci aligned but absent from the depth track.
        alignment_only: Vec<String>,
        /// Loci with depth but no alignment.
        depth_only: Vec<String>,
    },
    /// Percentages requested with no effective positions.
    #[error("no effective positions to compute a masking percentage from")]
    EmptyEffectiveLength,
}

/// Masking counters, summed across loci.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskCounts {
    /// Bases replaced with `N`.
    pub n_count: usize,
    /// Positions where the sample has a base.
    pub effective_length: usize,
    /// Indel columns (gap on exactly one side).
    pub mismatch_count: usize,
}

impl MaskCounts {
    /// Percentage of effective positions masked, two decimals.
    pub fn percent_masked(&self) -> Result<f64, MaskingError> {
        if self.effective_length == 0 {
            return Err(MaskingError::EmptyEffectiveLength);
        }
        Ok(round_to(
            self.n_count as f64 / self.effective_length as f64 * 100.0,
            2,
        ))
    }

    /// Percentage of effective positions left unmasked, one decimal.
    pub fn sequence_coverage(&self) -> Result<f64, MaskingError> {
        if self.effective_length == 0 {
            return Err(MaskingError::EmptyEffectiveLength);
        }
        let unmasked = self.effective_length - self.n_count;
        Ok(round_to(
            unmasked as f64 / self.effective_length as f64 * 100.0,
            1,
        ))
    }
}

impl AddAssign for MaskCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.n_count += rhs.n_count;
        self.effective_length += rhs.effective_length;
        self.mismatch_count += rhs.mismatch_count;
    }
}

/// Masked sample sequence for one locus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedLocus {
    /// Locus identifier.
    pub locus_id: Arc<str>,
    /// Sample bases with gaps removed and low-confidence bases masked.
    pub sequence: String,
    /// Counters for this locus.
    pub counts: MaskCounts,
}

/// Masked consensus across every locus of a sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskedConsensus {
    /// Per-locus output in alignment order.
    pub loci: Vec<MaskedLocus>,
    /// Counters summed over loci.
    pub totals: MaskCounts,
}

impl MaskedConsensus {
    /// FASTA records headed `<locus_id> <sample_id>`.
    pub fn to_fasta_records(&self, sample_id: &str) -> Vec<FastaRecord> {
        self.loci
            .iter()
            .map(|locus| FastaRecord::new(format!("{} {}", locus.locus_id, sample_id), locus.sequence.clone()))
            .collect()
    }
}

/// Replaces sample bases with `N` where the reference position is poorly
/// covered or excluded.
#[derive(Debug, Clone, Copy)]
pub struct Masker<'a> {
    coverage_cutoff: u32,
    regions: &'a BadRegionIndex,
}

impl<'a> Masker<'a> {
    /// Masker using a depth cutoff and exclusion index.
    pub fn new(coverage_cutoff: u32, regions: &'a BadRegionIndex) -> Self {
        Self {
            coverage_cutoff,
            regions,
        }
    }

    /// Mask every aligned locus, joining alignment and depth by locus id.
    ///
    /// Fails before any masking if the two inputs cover different loci.
    pub fn mask_all(
        &self,
        pairs: &[AlignmentPair],
        track: &DepthTrack,
    ) -> Result<MaskedConsensus, MaskingError> {
        check_same_loci(pairs, track)?;

        let mut consensus = MaskedConsensus::default();
        for pair in pairs {
            let depth = track
                .locus(&pair.locus_id)
                .ok_or_else(|| MaskingError::MissingDepth(pair.locus_id.to_string()))?;
            let masked = self.mask_locus(pair, depth)?;
            consensus.totals += masked.counts;
            consensus.loci.push(masked);
        }
        Ok(consensus)
    }

    /// Mask one locus.
    pub fn mask_locus(
        &self,
        pair: &AlignmentPair,
        depth: &LocusDepth,
    ) -> Result<MaskedLocus, MaskingError> {
        let last = depth
            .depths
            .len()
            .checked_sub(1)
            .ok_or_else(|| MaskingError::MissingDepth(pair.locus_id.to_string()))?;

        let mut counts = MaskCounts::default();
        let mut sequence = String::with_capacity(pair.columns());
        let mut cursor = 0usize;

        for (column, (&ref_base, &sample_base)) in pair.reference.iter().zip(&pair.sample).enumerate() {
            // Insertion columns read the depth of the next unconsumed
            // reference base; the cursor saturates at the locus end.
            let offset = cursor.min(last);
            match (ref_base == GAP, sample_base == GAP) {
                (false, false) | (true, false) => {
                    counts.effective_length += 1;
                    if self.should_mask(depth, offset) {
                        counts.n_count += 1;
                        sequence.push(MASK_BASE as char);
                    } else {
                        sequence.push(sample_base as char);
                    }
                    if ref_base == GAP {
                        counts.mismatch_count += 1;
                    } else {
                        cursor += 1;
                    }
                }
                (false, true) => {
                    counts.mismatch_count += 1;
                    cursor += 1;
                }
                (true, true) => {
                    return Err(MaskingError::GapOnlyColumn {
                        locus: pair.locus_id.to_string(),
                        column,
                    });
                }
            }
        }

        Ok(MaskedLocus {
            locus_id: Arc::clone(&pair.locus_id),
            sequence,
            counts,
        })
    }

    fn should_mask(&self, depth: &LocusDepth, offset: usize) -> bool {
        depth.depths[offset] < self.coverage_cutoff
            || self
                .regions
                .contains(&depth.locus_id, depth.start + offset as u64)
    }
}

fn check_same_loci(pairs: &[AlignmentPair], track: &DepthTrack) -> Result<(), MaskingError> {
    let aligned: BTreeSet<&str> = pairs.iter().map(|p| p.locus_id.as_ref()).collect();
    let covered: BTreeSet<&str> = track.locus_ids().map(|id| id.as_ref()).collect();
    if aligned == covered {
        return Ok(());
    }
    Err(MaskingError::LocusMismatch {
        alignment_only: aligned.difference(&covered).map(|s| s.to_string()).collect(),
        depth_only: covered.difference(&aligned).map(|s| s.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locus_depth(id: &str, depths: &[u32]) -> LocusDepth {
        LocusDepth {
            locus_id: Arc::from(id),
            start: 1,
            depths: depths.to_vec(),
        }
    }

    #[test]
    fn deletion_advances_cursor_without_output() {
        let pair = AlignmentPair::new("1", b"ACGT".to_vec(), b"A-GT".to_vec()).unwrap();
        let regions = BadRegionIndex::empty();
        let masked = Masker::new(30, &regions)
            .mask_locus(&pair, &locus_depth("1", &[50, 50, 5, 50]))
            .unwrap();
        assert_eq!(masked.sequence, "ANT");
        assert_eq!(
            masked.counts,
            MaskCounts {
                n_count: 1,
                effective_length: 3,
                mismatch_count: 1
            }
        );
    }

    #[test]
    fn insertion_uses_next_reference_depth() {
        // Column 2 is an insertion; the cursor points at reference base 3 (depth 4).
        let pair = AlignmentPair::new("1", b"AC-GT".to_vec(), b"ACTGT".to_vec()).unwrap();
        let regions = BadRegionIndex::empty();
        let masked = Masker::new(10, &regions)
            .mask_locus(&pair, &locus_depth("1", &[40, 40, 4, 40]))
            .unwrap();
        assert_eq!(masked.sequence, "ACNNT");
        assert_eq!(masked.counts.mismatch_count, 1);
        assert_eq!(masked.counts.effective_length, 5);
    }

    #[test]
    fn bad_region_masks_covered_bases() {
        let pair = AlignmentPair::new("seg", b"ACGT".to_vec(), b"ACGT".to_vec()).unwrap();
        let regions = BadRegionIndex::parse("seg:2-3").unwrap();
        let masked = Masker::new(30, &regions)
            .mask_locus(&pair, &locus_depth("seg", &[90, 90, 90, 90]))
            .unwrap();
        assert_eq!(masked.sequence, "ANNT");
    }

    #[test]
    fn gap_only_column_is_an_input_error() {
        let pair = AlignmentPair::new("1", b"A-C".to_vec(), b"A-C".to_vec()).unwrap();
        let regions = BadRegionIndex::empty();
        let err = Masker::new(1, &regions)
            .mask_locus(&pair, &locus_depth("1", &[5, 5]))
            .unwrap_err();
        assert_eq!(
            err,
            MaskingError::GapOnlyColumn {
                locus: "1".to_string(),
                column: 1
            }
        );
    }

    #[test]
    fn all_deleted_sample_has_no_percentage() {
        let pair = AlignmentPair::new("1", b"AC".to_vec(), b"--".to_vec()).unwrap();
        let regions = BadRegionIndex::empty();
        let masked = Masker::new(1, &regions)
            .mask_locus(&pair, &locus_depth("1", &[5, 5]))
            .unwrap();
        assert_eq!(masked.counts.effective_length, 0);
        assert_eq!(
            masked.counts.percent_masked(),
            Err(MaskingError::EmptyEffectiveLength)
        );
    }

    #[test]
    fn mask_all_requires_matching_loci() {
        let track = DepthTrack::parse("a\t1\t50\nb\t1\t50\n".as_bytes()).unwrap();
        let pairs = vec![AlignmentPair::new("a", b"A".to_vec(), b"A".to_vec()).unwrap()];
        let regions = BadRegionIndex::empty();
        let err = Masker::new(30, &regions).mask_all(&pairs, &track).unwrap_err();
        assert_eq!(
            err,
            MaskingError::LocusMismatch {
                alignment_only: vec![],
                depth_only: vec!["b".to_string()]
            }
        );
    }

    #[test]
    fn totals_and_percentages_span_loci() {
        let track = DepthTrack::parse("a\t1\t50\na\t2\t1\nb\t1\t50\nb\t2\t50\n".as_bytes()).unwrap();
        let pairs = vec![
            AlignmentPair::new("a", b"AC".to_vec(), b"AC".to_vec()).unwrap(),
            AlignmentPair::new("b", b"GT".to_vec(), b"GT".to_vec()).unwrap(),
        ];
        let regions = BadRegionIndex::empty();
        let consensus = Masker::new(30, &regions).mask_all(&pairs, &track).unwrap();
        assert_eq!(consensus.totals.n_count, 1);
        assert_eq!(consensus.totals.effective_length, 4);
        assert_eq!(consensus.totals.percent_masked(), Ok(25.0));
        assert_eq!(consensus.totals.sequence_coverage(), Ok(75.0));
        let records = consensus.to_fasta_records("S01");
        assert_eq!(records[0].header, "a S01");
        assert_eq!(records[0].sequence, "AN");
    }
}
