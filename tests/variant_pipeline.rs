#[path = "common/mod.rs"]
mod common;

use common::{assert_snapshot, vcf_line, vcf_text, write_file};
use nanocurate::genomics::{refine_file, BadRegionIndex, RefinePolicy, VariantStream, VariantType};
use proptest::prelude::*;

fn policy() -> RefinePolicy {
    RefinePolicy {
        coverage_cutoff: 30.0,
        min_frequency: 0.8,
        max_indel: 90,
    }
}

fn sample_stream() -> String {
    vcf_text(&[
        vcf_line("MN908947.3", 241, "C", "T", [0, 1, 48, 50], &[0], 100, 99),
        vcf_line("MN908947.3", 3037, "C", "T", [0, 0, 10, 9], &[1], 20, 20),
        vcf_line("MN908947.3", 11287, "GTCTGGTTTT", "G", [1, 1, 40, 41], &[2, 1], 88, 90),
        vcf_line("MN908947.3", 21765, "T", "TACATG", [4, 4, 30, 31], &[0], 70, 82),
        vcf_line("MN908947.3", 23403, "A", "G", [0, 0, 40, 40], &[0, 0], 80, 80),
    ])
}

#[test]
fn extract_after_refine_reports_exactly_the_retained_lines() {
    let stream = VariantStream::parse(sample_stream().as_bytes()).unwrap();
    let regions = BadRegionIndex::parse("MN908947.3:23400-23410").unwrap();
    let (refined, stats) = stream.refine(&policy(), &regions);

    assert_eq!(stats.examined, 5);
    assert_eq!(stats.retained, 3);

    let summaries = refined.extract();
    let positions: Vec<u64> = summaries.iter().map(|s| s.position).collect();
    let retained: Vec<u64> = refined.records().map(|r| r.position).collect();
    assert_eq!(positions, retained);
    assert_eq!(positions, vec![241, 11287, 21765]);

    let types: Vec<VariantType> = summaries.iter().map(|s| s.variant_type).collect();
    assert_eq!(
        types,
        vec![VariantType::Snp, VariantType::Deletion, VariantType::Insertion]
    );
    assert_eq!(summaries[1].mutation, "GTCTGGTTTT-->G");
    assert_eq!(summaries[0].frequency, 0.98);
}

#[test]
fn refine_file_rewrites_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "variants.vcf", &sample_stream());

    let (_, stats) = refine_file(&path, &policy(), &BadRegionIndex::empty()).unwrap();
    assert_eq!(stats.retained, 4);

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert_snapshot("refined/variants.vcf", &on_disk);
    assert!(!dir.path().join("variants.vcf.refining").exists());

    let (_, again) = refine_file(&path, &policy(), &BadRegionIndex::empty()).unwrap();
    assert_eq!(again.examined, 4);
    assert_eq!(again.retained, 4);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), on_disk);
}

#[test]
fn malformed_record_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let text = format!("{}1\t5\t.\tA\tG\n", vcf_text(&[vcf_line("1", 2, "A", "G", [0, 0, 5, 5], &[0], 10, 40)]));
    let path = write_file(dir.path(), "broken.vcf", &text);

    assert!(refine_file(&path, &policy(), &BadRegionIndex::empty()).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
}

fn arb_line() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["seg1", "seg2", "seg3"]),
        1u64..500,
        prop::sample::select(vec!["A", "AC", "ACGTT"]),
        prop::sample::select(vec!["G", "GT", "GTTTTTTT"]),
        prop::array::uniform4(0u32..40),
        prop::collection::vec(0u32..5, 1..3),
        0u32..40,
        0u32..200,
    )
        .prop_map(|(locus, pos, r, a, sr, ar, extra, dp)| {
            let dpsp = sr[2] + sr[3] + ar.iter().sum::<u32>() + extra;
            vcf_line(locus, pos, r, a, sr, &ar, dpsp, dp)
        })
}

proptest! {
    #[test]
    fn refine_is_idempotent(lines in prop::collection::vec(arb_line(), 0..40)) {
        let stream = VariantStream::parse(vcf_text(&lines).as_bytes()).unwrap();
        let regions = BadRegionIndex::parse("seg2:100-200").unwrap();
        let (once, first) = stream.refine(&policy(), &regions);
        let (twice, second) = once.refine(&policy(), &regions);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(first.retained, second.examined);
        prop_assert_eq!(second.examined, second.retained);
    }

    #[test]
    fn frequency_stays_in_unit_interval(lines in prop::collection::vec(arb_line(), 1..40)) {
        let stream = VariantStream::parse(vcf_text(&lines).as_bytes()).unwrap();
        for record in stream.records() {
            let frequency = record.frequency();
            prop_assert!((0.0..=1.0).contains(&frequency));
            let denominator = record.span_depth - record.ambiguous_read_depth.iter().sum::<f64>();
            if denominator <= 0.0 {
                prop_assert_eq!(frequency, 0.0);
            }
        }
    }

    #[test]
    fn non_positive_denominator_means_zero_frequency(
        support in prop::array::uniform4(0u32..40),
        ambiguous in 1u32..50,
        deficit in 0u32..50,
    ) {
        let dpsp = ambiguous.saturating_sub(deficit);
        let line = vcf_line("seg1", 10, "A", "G", support, &[ambiguous], dpsp, 100);
        let stream = VariantStream::parse(vcf_text(&[line]).as_bytes()).unwrap();
        let record = stream.records().next().unwrap();
        prop_assert_eq!(record.frequency(), 0.0);
        let (refined, _) = stream.refine(&policy(), &BadRegionIndex::empty());
        prop_assert!(refined.is_empty());
    }
}
