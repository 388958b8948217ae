//! Performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nanocurate::genomics::{AlignmentPair, BadRegionIndex, DepthTrack, Masker, RefinePolicy, VariantStream};

const LOCUS_LEN: usize = 30_000;

fn variant_text(records: usize) -> String {
    let mut text = String::from("##fileformat=VCFv4.1\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n");
    for idx in 0..records {
        let depth = 20 + (idx % 80);
        text.push_str(&format!(
            "chr1\t{}\t.\tA\tG\t30\tPASS\tAR=0;DP={depth};DPS=20,20;DPSP={depth};SR=0,0,{},{}\n",
            idx * 10 + 1,
            depth / 2,
            depth / 2 - idx % 3
        ));
    }
    text
}

fn benchmark_refine(c: &mut Criterion) {
    let stream = VariantStream::parse(variant_text(3_000).as_bytes()).expect("bench variants parse");
    let policy = RefinePolicy {
        coverage_cutoff: 30.0,
        min_frequency: 0.8,
        max_indel: 90,
    };
    let regions = BadRegionIndex::parse("chr1:1000-2000").expect("bench regions parse");

    c.bench_function("refine_3000_records", |b| {
        b.iter(|| black_box(stream.refine(&policy, &regions)));
    });
}

fn benchmark_mask(c: &mut Criterion) {
    let depth: String = (0..LOCUS_LEN)
        .map(|idx| format!("chr1\t{}\t{}\n", idx + 1, idx % 60))
        .collect();
    let track = DepthTrack::parse(depth.as_bytes()).expect("bench depth parses");
    let reference: Vec<u8> = (0..LOCUS_LEN).map(|idx| b"ACGT"[idx % 4]).collect();
    let mut sample = reference.clone();
    for idx in (0..LOCUS_LEN).step_by(997) {
        sample[idx] = b'-';
    }
    let pairs = vec![AlignmentPair::new("chr1", reference, sample).expect("bench rows align")];
    let regions = BadRegionIndex::parse("chr1:100-400").expect("bench regions parse");

    c.bench_function("mask_30kb_locus", |b| {
        b.iter(|| black_box(Masker::new(30, &regions).mask_all(&pairs, &track)));
    });
}

criterion_group!(benches, benchmark_refine, benchmark_mask);
criterion_main!(benches);
