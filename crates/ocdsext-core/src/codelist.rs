//! Codelist model: ordered rows of codes with provenance

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// The column that identifies a code
pub const CODE: &str = "Code";

/// The column that marks a code as deprecated
pub const DEPRECATED: &str = "Deprecated";

/// The provenance tag of codes from the standard itself
pub const CORE: &str = "OCDS Core";

/// A row of a codelist, with the name of the extension it comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodelistCode {
    /// Column values, in column order
    pub data: IndexMap<String, String>,
    /// The contributing extension, or the standard
    pub extension_name: Option<String>,
}

impl CodelistCode {
    /// Create a new row
    pub fn new(data: IndexMap<String, String>, extension_name: Option<String>) -> Self {
        Self {
            data,
            extension_name,
        }
    }

    /// The row's code, or an empty string if it has no `Code` column
    pub fn code(&self) -> &str {
        self.get(CODE).unwrap_or_default()
    }

    /// Get a column value
    pub fn get(&self, column: &str) -> Option<&str> {
        self.data.get(column).map(String::as_str)
    }

    /// Set a column value, appending the column if new
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.data.insert(column.into(), value.into());
    }

    /// Remove a column, preserving the order of the others
    pub fn remove(&mut self, column: &str) -> Option<String> {
        self.data.shift_remove(column)
    }

    /// Iterate over (column, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Index<&str> for CodelistCode {
    type Output = str;

    fn index(&self, column: &str) -> &str {
        &self.data[column]
    }
}

/// A codelist file
///
/// The file name encodes the codelist's role: `+name.csv` adds codes to
/// `name.csv`, `-name.csv` removes codes from it, and `name.csv` is either a
/// new codelist or a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codelist {
    /// File name, including any `+` or `-` prefix
    pub name: String,
    /// Rows, in the order added
    pub rows: Vec<CodelistCode>,
}

impl Codelist {
    /// Create a new empty codelist
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    /// Append rows, tagged with the contributing extension
    pub fn extend<I>(&mut self, rows: I, extension_name: Option<&str>)
    where
        I: IntoIterator<Item = IndexMap<String, String>>,
    {
        self.rows.extend(
            rows.into_iter()
                .map(|data| CodelistCode::new(data, extension_name.map(str::to_string))),
        );
    }

    /// Add a column with the name of the extension from which each code originates
    pub fn add_extension_column(&mut self, field_name: &str) {
        for row in &mut self.rows {
            let value = row.extension_name.clone().unwrap_or_default();
            row.insert(field_name, value);
        }
    }

    /// Remove deprecated codes and the `Deprecated` column
    pub fn remove_deprecated_codes(&mut self) {
        self.rows.retain_mut(|row| {
            row.remove(DEPRECATED)
                .map_or(true, |value| value.is_empty())
        });
    }

    /// The codes, in row order
    pub fn codes(&self) -> Vec<&str> {
        self.rows.iter().map(CodelistCode::code).collect()
    }

    /// All column names used in any row, in first-seen order
    pub fn fieldnames(&self) -> Vec<&str> {
        let mut fieldnames: Vec<&str> = Vec::new();
        for row in &self.rows {
            for column in row.data.keys() {
                if !fieldnames.contains(&column.as_str()) {
                    fieldnames.push(column);
                }
            }
        }
        fieldnames
    }

    /// The name of the codelist this one modifies, or its own name
    pub fn basename(&self) -> &str {
        if self.patch() {
            &self.name[1..]
        } else {
            &self.name
        }
    }

    /// Whether the codelist modifies another codelist
    pub fn patch(&self) -> bool {
        self.addend() || self.subtrahend()
    }

    /// Whether the codelist adds codes to another codelist
    pub fn addend(&self) -> bool {
        self.name.starts_with('+')
    }

    /// Whether the codelist removes codes from another codelist
    pub fn subtrahend(&self) -> bool {
        self.name.starts_with('-')
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CodelistCode> {
        self.rows.iter()
    }

    /// Serialize to CSV, with a header of all field names
    ///
    /// Rows missing a column get an empty cell.
    pub fn to_csv(&self) -> Result<String> {
        let fieldnames = self.fieldnames();
        let mut writer = csv::Writer::from_writer(Vec::new());
        let csv_error = |source| Error::Csv {
            name: self.name.clone(),
            source,
        };

        if !fieldnames.is_empty() {
            writer.write_record(&fieldnames).map_err(csv_error)?;
        }
        for row in &self.rows {
            let record = fieldnames.iter().map(|f| row.get(f).unwrap_or_default());
            writer.write_record(record).map_err(csv_error)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|_| Error::Utf8 {
            name: self.name.clone(),
        })
    }
}

impl<'a> IntoIterator for &'a Codelist {
    type Item = &'a CodelistCode;
    type IntoIter = std::slice::Iter<'a, CodelistCode>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
