//! Brand code to universal brand lookup table.

use std::collections::HashMap;

use crate::{config::BrandMapColumns, prelude::*};

/// Maps brand codes, as printed on labels, to universal brands.
///
/// Keys and values are trimmed and uppercased.
#[derive(Clone, Debug, Default)]
pub struct BrandMap {
    mapping: HashMap<String, String>,
}

impl BrandMap {
    /// Load the mapping from a CSV file.
    ///
    /// This never fails. If the file is missing or unusable, we log a warning
    /// and return an empty mapping, which resolves every code to itself.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path, columns: &BrandMapColumns) -> Self {
        match Self::from_path(path, columns) {
            Ok(map) => {
                info!(count = map.len(), "Loaded brand mapping");
                map
            }
            Err(err) => {
                warn!(
                    "Could not load brand mapping, brand codes will map to themselves: {:?}",
                    err
                );
                Self::default()
            }
        }
    }

    /// Load the mapping from a CSV file, reporting errors.
    pub fn from_path(path: &Path, columns: &BrandMapColumns) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open brand mapping {:?}", path))?;
        Self::from_reader(file, columns)
            .with_context(|| format!("cannot read brand mapping {:?}", path))
    }

    /// Load the mapping from any CSV reader.
    pub fn from_reader(rdr: impl std::io::Read, columns: &BrandMapColumns) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
        let headers = rdr.headers().context("cannot read CSV header")?.clone();
        let find_column = |wanted: &str| {
            headers
                .iter()
                .position(|h| strip_bom(h).trim() == wanted)
                .ok_or_else(|| anyhow!("missing column {:?}", wanted))
        };
        let code_idx = find_column(&columns.code_column)?;
        let universal_idx = find_column(&columns.universal_column)?;

        let mut mapping = HashMap::new();
        for (row_idx, record) in rdr.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    warn!("Skipping unreadable brand mapping row {}: {}", row_idx + 1, err);
                    continue;
                }
            };
            let code = record.get(code_idx).unwrap_or("").trim().to_uppercase();
            if code.is_empty() {
                continue;
            }
            let universal = record.get(universal_idx).unwrap_or("").trim().to_uppercase();
            mapping.insert(code, universal);
        }
        Ok(Self { mapping })
    }

    /// Look up a brand code, if it is mapped.
    pub fn get(&self, brand_code: &str) -> Option<&str> {
        self.mapping.get(brand_code).map(String::as_str)
    }

    /// Resolve a brand code to its universal brand, falling back to the code
    /// itself (with a warning) when it is not mapped.
    pub fn resolve(&self, brand_code: &str) -> String {
        match self.get(brand_code) {
            Some(universal) => universal.to_owned(),
            None => {
                warn!(
                    "Brand code {:?} has no universal brand mapping; using it as-is",
                    brand_code
                );
                brand_code.to_owned()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

#[cfg(test)]
impl FromIterator<(&'static str, &'static str)> for BrandMap {
    fn from_iter<I: IntoIterator<Item = (&'static str, &'static str)>>(iter: I) -> Self {
        Self {
            mapping: iter
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        }
    }
}

/// Spreadsheet exports often start with a UTF-8 byte-order mark.
fn strip_bom(s: &str) -> &str {
    s.strip_prefix('\u{feff}').unwrap_or(s)
}
