use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while loading the metadata table.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Malformed delimited text.
    #[error("failed to read metadata table {path}: {source}")]
    Csv {
        /// Table path.
        path: PathBuf,
        /// Parser failure.
        #[source]
        source: csv::Error,
    },
    /// Header with fewer than the two mandatory columns.
    #[error("metadata table {0} needs at least two columns (sample id, read file)")]
    TooFewColumns(PathBuf),
}

/// One sample row of the metadata table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRow {
    /// Sample identifier (column 0).
    pub sample_id: String,
    /// Read file name (column 1).
    pub file_name: String,
    /// Every column of the row, verbatim.
    pub fields: Vec<String>,
}

/// Sample metadata, carried column-for-column into the batch report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTable {
    /// Header row.
    pub header: Vec<String>,
    /// Data rows in file order.
    pub rows: Vec<MetadataRow>,
}

impl MetadataTable {
    /// Load a table, tab-delimited for `.tsv` files and comma-delimited
    /// otherwise; lines starting with `#` are skipped.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        let wrap = |source| MetadataError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_for(path))
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(wrap)?;

        let header: Vec<String> = reader.headers().map_err(wrap)?.iter().map(str::to_string).collect();
        if header.len() < 2 {
            return Err(MetadataError::TooFewColumns(path.to_path_buf()));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(wrap)?;
            let fields: Vec<String> = record.iter().map(str::to_string).collect();
            if fields.iter().all(|field| field.is_empty()) {
                continue;
            }
            rows.push(MetadataRow {
                sample_id: fields.first().cloned().unwrap_or_default(),
                file_name: fields.get(1).cloned().unwrap_or_default(),
                fields,
            });
        }
        Ok(Self { header, rows })
    }

    /// Row whose file name or sample id matches a read file.
    pub fn find(&self, file_name: &str, sample_id: &str) -> Option<&MetadataRow> {
        self.rows
            .iter()
            .find(|row| row.file_name == file_name)
            .or_else(|| self.rows.iter().find(|row| row.sample_id == sample_id))
    }
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}
