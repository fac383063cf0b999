//! Output records and the CSV table they are appended to.
//!
//! The table is append-only during normal processing. Duplicates across
//! images are tolerated until someone runs [`RecordStore::compact`].

use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{self, Write},
};

use tempfile::NamedTempFile;

use crate::prelude::*;

/// Header row of the output table.
pub const HEADER: [&str; 7] = [
    "mainBrandCode",
    "convertCode",
    "englishName",
    "universalBrand",
    "brandCode",
    "partNumber",
    "sourceFile",
];

/// Number of leading columns that make up a record's identity.
pub const KEY_LEN: usize = 6;

/// One row of the output table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub main_brand_code: String,
    pub convert_code: String,
    pub english_name: String,
    pub universal_brand: String,
    pub brand_code: String,
    pub part_number: String,

    /// Name of the image the record came from. Provenance only; not part of
    /// the record's identity.
    pub source_file: String,
}

/// The identity of a record: everything except `source_file`.
pub type RecordKey = [String; KEY_LEN];

impl OutputRecord {
    /// The fields that define uniqueness.
    pub fn key(&self) -> RecordKey {
        [
            self.main_brand_code.clone(),
            self.convert_code.clone(),
            self.english_name.clone(),
            self.universal_brand.clone(),
            self.brand_code.clone(),
            self.part_number.clone(),
        ]
    }
}

/// Trim and uppercase a text field.
pub fn normalize_field(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Collects records for one image, dropping records whose key was already
/// seen in this image.
#[derive(Debug, Default)]
pub struct RecordBatch {
    seen: HashSet<RecordKey>,
    records: Vec<OutputRecord>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Returns `false` if an identical record was already added.
    pub fn push(&mut self, record: OutputRecord) -> bool {
        if self.seen.insert(record.key()) {
            self.records.push(record);
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn into_records(self) -> Vec<OutputRecord> {
        self.records
    }
}

/// What [`RecordStore::compact`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Data rows left in the table.
    pub kept: usize,
    /// Duplicate rows removed.
    pub removed: usize,
    /// Rows with too few columns, also removed.
    pub malformed: usize,
}

/// The output CSV table.
#[derive(Clone, Debug)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records to the table, creating it with a header if needed.
    ///
    /// Either every record is appended or none are: if writing fails part way
    /// through, the file is truncated back to its original length.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), count = records.len()))]
    pub fn append(&self, records: &[OutputRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("cannot open {:?} for appending", self.path))?;
        let original_len = file
            .metadata()
            .with_context(|| format!("cannot stat {:?}", self.path))?
            .len();

        // Serialize everything up front, so the only thing that can fail
        // part way is the write itself.
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(vec![]);
        if original_len == 0 {
            wtr.write_record(HEADER)?;
        }
        for record in records {
            wtr.serialize(record)
                .with_context(|| format!("cannot serialize {:?}", record))?;
        }
        let data = wtr.into_inner().context("cannot flush CSV buffer")?;

        append_or_roll_back(&mut file, original_len, &data)
            .with_context(|| format!("cannot append to {:?}", self.path))?;
        debug!("Appended {} records", records.len());
        Ok(())
    }

    /// Read every data row of the table, without the header.
    pub fn read_rows(&self) -> Result<Vec<csv::StringRecord>> {
        let (_, rows) = self.read_table()?;
        Ok(rows)
    }

    /// Read the header (if any) and all data rows.
    fn read_table(&self) -> Result<(Option<csv::StringRecord>, Vec<csv::StringRecord>)> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("cannot open {:?}", self.path))?;
        let mut records = rdr.records();
        let header = records
            .next()
            .transpose()
            .with_context(|| format!("cannot read header of {:?}", self.path))?;
        let rows = records
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("cannot read rows of {:?}", self.path))?;
        Ok((header, rows))
    }

    /// Remove duplicate rows from the whole table, keeping the first
    /// occurrence of each key. Rows too short to have a key are dropped.
    ///
    /// The table is rewritten via a temporary file and an atomic rename, and
    /// only if something actually changed.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub fn compact(&self) -> Result<CompactionReport> {
        if !self.path.exists() {
            warn!("{:?} does not exist, nothing to compact", self.path);
            return Ok(CompactionReport::default());
        }

        let (header, rows) = self.read_table()?;
        let mut report = CompactionReport::default();
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() < KEY_LEN {
                report.malformed += 1;
                continue;
            }
            let key = row.iter().take(KEY_LEN).map(str::to_owned).collect::<Vec<_>>();
            if seen.insert(key) {
                unique.push(row);
            } else {
                report.removed += 1;
            }
        }
        report.kept = unique.len();

        if report.removed == 0 && report.malformed == 0 {
            info!("No duplicate records found");
            return Ok(report);
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_owned(),
            _ => PathBuf::from("."),
        };
        let tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("cannot create temporary file in {:?}", dir))?;
        {
            let mut wtr = csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_writer(tmp.as_file());
            if let Some(header) = &header {
                wtr.write_record(header)?;
            }
            for row in &unique {
                wtr.write_record(row)?;
            }
            wtr.flush().context("cannot write compacted table")?;
        }
        tmp.as_file()
            .sync_all()
            .context("cannot sync compacted table")?;
        tmp.persist(&self.path)
            .with_context(|| format!("cannot replace {:?}", self.path))?;

        info!(
            kept = report.kept,
            removed = report.removed,
            malformed = report.malformed,
            "Compacted output table"
        );
        Ok(report)
    }
}

/// Something we can append to, flush to disk, and cut back to an earlier
/// length.
trait AppendTarget: Write {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl AppendTarget for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write all of `data` and sync it. If anything fails, cut `target` back to
/// `original_len` so that readers never see part of the batch.
fn append_or_roll_back(
    target: &mut impl AppendTarget,
    original_len: u64,
    data: &[u8],
) -> io::Result<()> {
    let result = target
        .write_all(data)
        .and_then(|()| target.flush())
        .and_then(|()| target.sync());
    if let Err(err) = result {
        if let Err(truncate_err) = target.truncate(original_len) {
            error!("Could not roll back partial write: {}", truncate_err);
        }
        return Err(err);
    }
    Ok(())
}
