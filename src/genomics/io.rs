use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Whether the path carries a `.gz` extension.
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

/// Open a text file for buffered reading, decompressing `.gz` inputs.
pub fn open_text<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path.as_ref())?;
    if is_gzipped(path.as_ref()) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Compress `path` to `path.gz`, returning the compressed file's path.
///
/// The uncompressed original is left in place.
pub fn gzip_file<P: AsRef<Path>>(path: P) -> io::Result<PathBuf> {
    let path = path.as_ref();
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let mut input = BufReader::new(File::open(path)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(&target)?), Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(target)
}
