#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub const VCF_HEADER: &str = "##fileformat=VCFv4.1\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO";

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("NANOCURATE_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set NANOCURATE_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// Annotated variant line with the INFO keys the refiner reads.
pub fn vcf_line(
    locus: &str,
    position: u64,
    reference: &str,
    alternate: &str,
    sr: [u32; 4],
    ar: &[u32],
    dpsp: u32,
    dp: u32,
) -> String {
    let ar: Vec<String> = ar.iter().map(u32::to_string).collect();
    format!(
        "{locus}\t{position}\t.\t{reference}\t{alternate}\t27.5\tPASS\tAR={};DP={dp};DPS={},{};DPSP={dpsp};SR={},{},{},{}",
        ar.join(","),
        sr[0] + sr[2],
        sr[1] + sr[3],
        sr[0],
        sr[1],
        sr[2],
        sr[3],
    )
}

/// Header plus data lines, newline-terminated.
pub fn vcf_text(lines: &[String]) -> String {
    let mut text = String::from(VCF_HEADER);
    for line in lines {
        text.push('\n');
        text.push_str(line);
    }
    text.push('\n');
    text
}

/// Depth rows for consecutive positions starting at 1.
pub fn depth_rows(locus: &str, depths: &[u32]) -> String {
    depths
        .iter()
        .enumerate()
        .map(|(idx, depth)| format!("{locus}\t{}\t{depth}\n", idx + 1))
        .collect()
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}
