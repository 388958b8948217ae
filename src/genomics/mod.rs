//! Data-processing components that sit between external-tool outputs and the
//! reported artifacts.
//!
//! Nothing here spawns processes; every component works on parsed, in-memory
//! inputs (a variant stream, a depth track, pairwise alignments).

mod coverage;
mod depth;
mod fasta;
mod io;
mod masking;
mod regions;
mod variants;

pub use coverage::{
    BandCounts, CoverageBand, CoverageError, CoveragePoint, CoverageSeries, CoverageThresholds,
    LocusCoverage, LocusVariants, VariantMarker,
};
pub use depth::{DepthParseError, DepthTrack, LocusDepth};
pub use fasta::{
    pair_alignments, read_fasta, read_fasta_path, write_fasta, write_fasta_path,
    write_pairwise_input, AlignmentPair, FastaError, FastaRecord, REFERENCE_TAG, SAMPLE_TAG,
};
pub use io::{gzip_file, is_gzipped, open_text};
pub use masking::{
    MaskCounts, MaskedConsensus, MaskedLocus, Masker, MaskingError, GAP, MASK_BASE,
};
pub use regions::{BadRegionIndex, RegionKey, RegionSpecError, MAX_REGION_SPAN, NO_REGIONS};
pub use variants::{
    refine_file, RefinePolicy, RefineStats, VariantParseError, VariantRecord, VariantStream,
    VariantSummary, VariantType,
};
