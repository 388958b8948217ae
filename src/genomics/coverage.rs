use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::depth::DepthTrack;
use super::variants::VariantSummary;

/// Errors raised while building or exporting coverage series.
#[derive(Debug, Error)]
pub enum CoverageError {
    /// Ideal coverage configured below the low-coverage cutoff.
    #[error("ideal coverage {ideal} is below the coverage cutoff {cutoff}")]
    InvertedThresholds {
        /// Low-coverage cutoff.
        cutoff: u32,
        /// High-coverage threshold.
        ideal: u32,
    },
    /// Serialization failure.
    #[error("failed to serialize coverage series: {0}")]
    Json(#[from] serde_json::Error),
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coverage quality band of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageBand {
    /// Depth at or below the cutoff.
    Low,
    /// Depth between the cutoff and the ideal coverage.
    Medium,
    /// Depth at or above the ideal coverage.
    High,
}

/// Low and high coverage thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoverageThresholds {
    cutoff: u32,
    ideal: u32,
}

impl CoverageThresholds {
    /// Thresholds with `ideal >= cutoff`.
    pub fn new(cutoff: u32, ideal: u32) -> Result<Self, CoverageError> {
        if ideal < cutoff {
            return Err(CoverageError::InvertedThresholds { cutoff, ideal });
        }
        Ok(Self { cutoff, ideal })
    }

    /// Low-coverage cutoff.
    pub fn cutoff(&self) -> u32 {
        self.cutoff
    }

    /// High-coverage threshold.
    pub fn ideal(&self) -> u32 {
        self.ideal
    }

    /// Band for a depth.
    pub fn classify(&self, depth: u32) -> CoverageBand {
        if depth <= self.cutoff {
            CoverageBand::Low
        } else if depth < self.ideal {
            CoverageBand::Medium
        } else {
            CoverageBand::High
        }
    }
}

/// Depth at one position with its band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoveragePoint {
    /// 1-based position.
    pub position: u64,
    /// Read depth.
    pub depth: u32,
    /// Quality band.
    pub band: CoverageBand,
}

/// Number of positions per band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BandCounts {
    /// Low-coverage positions.
    pub low: usize,
    /// Medium-coverage positions.
    pub medium: usize,
    /// High-coverage positions.
    pub high: usize,
}

/// Classified depth series for one locus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocusCoverage {
    /// Locus identifier.
    pub locus_id: Arc<str>,
    /// Points in position order.
    pub points: Vec<CoveragePoint>,
}

impl LocusCoverage {
    /// Tally of points per band.
    pub fn band_counts(&self) -> BandCounts {
        self.points.iter().fold(BandCounts::default(), |mut acc, point| {
            match point.band {
                CoverageBand::Low => acc.low += 1,
                CoverageBand::Medium => acc.medium += 1,
                CoverageBand::High => acc.high += 1,
            }
            acc
        })
    }
}

/// Position and depth of a retained variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VariantMarker {
    /// 1-based position.
    pub position: u64,
    /// Total depth reported for the variant.
    pub depth: f64,
}

/// Retained variants of one locus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocusVariants {
    /// Locus identifier.
    pub locus_id: Arc<str>,
    /// Markers in stream order.
    pub markers: Vec<VariantMarker>,
}

/// Everything the plotting collaborator needs for a sample's coverage chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageSeries {
    /// Band thresholds.
    pub thresholds: CoverageThresholds,
    /// Mean depth over all positions (0 for an empty track).
    pub mean_depth: f64,
    /// Largest position on any locus.
    pub max_position: u64,
    /// Per-locus classified depth series.
    pub loci: Vec<LocusCoverage>,
    /// Retained variants grouped by locus in first-seen order.
    pub variants: Vec<LocusVariants>,
}

impl CoverageSeries {
    /// Classify the depth track and group variant positions by locus.
    pub fn aggregate(
        track: &DepthTrack,
        variants: &[VariantSummary],
        thresholds: CoverageThresholds,
    ) -> Self {
        let loci = track
            .loci()
            .iter()
            .map(|locus| LocusCoverage {
                locus_id: Arc::clone(&locus.locus_id),
                points: locus
                    .iter()
                    .map(|(position, depth)| CoveragePoint {
                        position,
                        depth,
                        band: thresholds.classify(depth),
                    })
                    .collect(),
            })
            .collect();

        Self {
            thresholds,
            mean_depth: track.mean_depth().unwrap_or(0.0),
            max_position: track.max_position(),
            loci,
            variants: group_variants(variants),
        }
    }

    /// Band tally over all loci.
    pub fn band_counts(&self) -> BandCounts {
        self.loci.iter().map(LocusCoverage::band_counts).fold(
            BandCounts::default(),
            |acc, counts| BandCounts {
                low: acc.low + counts.low,
                medium: acc.medium + counts.medium,
                high: acc.high + counts.high,
            },
        )
    }

    /// Write the series as JSON.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), CoverageError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

fn group_variants(variants: &[VariantSummary]) -> Vec<LocusVariants> {
    let mut groups: Vec<LocusVariants> = Vec::new();
    let mut by_locus: HashMap<Arc<str>, usize> = HashMap::new();
    for variant in variants {
        let idx = *by_locus
            .entry(Arc::clone(&variant.locus_id))
            .or_insert_with(|| {
                groups.push(LocusVariants {
                    locus_id: Arc::clone(&variant.locus_id),
                    markers: Vec::new(),
                });
                groups.len() - 1
            });
        groups[idx].markers.push(VariantMarker {
            position: variant.position,
            depth: variant.total_depth,
        });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::VariantType;
    use test_case::test_case;

    #[test_case(5 => CoverageBand::Low ; "below cutoff")]
    #[test_case(30 => CoverageBand::Low ; "at cutoff")]
    #[test_case(40 => CoverageBand::Medium ; "between")]
    #[test_case(200 => CoverageBand::High ; "at ideal")]
    #[test_case(250 => CoverageBand::High ; "above ideal")]
    fn classifies_depth(depth: u32) -> CoverageBand {
        CoverageThresholds::new(30, 200).unwrap().classify(depth)
    }

    #[test]
    fn rejects_inverted_thresholds() {
        assert!(matches!(
            CoverageThresholds::new(50, 10),
            Err(CoverageError::InvertedThresholds { cutoff: 50, ideal: 10 })
        ));
    }

    fn summary(locus: &str, position: u64, depth: f64) -> VariantSummary {
        VariantSummary {
            position,
            mutation: "A-->G".to_string(),
            frequency: 1.0,
            variant_type: VariantType::Snp,
            locus_id: Arc::from(locus),
            total_depth: depth,
        }
    }

    #[test]
    fn aggregates_series_and_groups_variants() {
        let track = DepthTrack::parse("s1\t1\t5\ns1\t2\t40\ns1\t3\t250\ns2\t1\t90\n".as_bytes()).unwrap();
        let variants = vec![
            summary("s2", 1, 90.0),
            summary("s1", 2, 40.0),
            summary("s2", 7, 91.0),
        ];
        let series = CoverageSeries::aggregate(&track, &variants, CoverageThresholds::new(30, 200).unwrap());

        let bands: Vec<CoverageBand> = series.loci[0].points.iter().map(|p| p.band).collect();
        assert_eq!(bands, vec![CoverageBand::Low, CoverageBand::Medium, CoverageBand::High]);
        assert_eq!(series.band_counts(), BandCounts { low: 1, medium: 2, high: 1 });
        assert_eq!(series.max_position, 3);

        assert_eq!(series.variants.len(), 2);
        assert_eq!(series.variants[0].locus_id.as_ref(), "s2");
        let positions: Vec<u64> = series.variants[0].markers.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![1, 7]);
        assert_eq!(series.variants[1].markers[0].depth, 40.0);
    }

    #[test]
    fn exports_json() {
        let track = DepthTrack::parse("s1\t1\t5\n".as_bytes()).unwrap();
        let series = CoverageSeries::aggregate(&track, &[], CoverageThresholds::new(30, 200).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage_series.json");
        series.write_json(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["loci"][0]["points"][0]["band"], "low");
        assert_eq!(json["thresholds"]["ideal"], 200);
    }
}
