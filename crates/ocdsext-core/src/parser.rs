//! CSV parser for codelist and manifest files

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Parse CSV text into rows keyed by the header's column names
///
/// Accepts `\r`, `\n` and `\r\n` line endings, even mixed in one file.
/// Short rows are padded with empty values; long rows are truncated.
pub fn parse_rows(content: &str, source_name: &str) -> Result<Vec<IndexMap<String, String>>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let csv_error = |source| Error::Csv {
        name: source_name.to_string(),
        source,
    };

    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (row_idx, result) in csv_reader.records().enumerate() {
        let record = result.map_err(csv_error)?;

        if record.len() > headers.len() {
            warn!(
                "row {} in {} has more cells than columns, truncating",
                row_idx + 1,
                source_name
            );
        }

        let row: IndexMap<String, String> = headers
            .iter()
            .enumerate()
            .map(|(i, column)| (column.clone(), record.get(i).unwrap_or_default().to_string()))
            .collect();

        rows.push(row);
    }

    Ok(rows)
}

/// Parse CSV text into typed records, matching columns by header name
pub fn parse_records<T: DeserializeOwned>(content: &str, source_name: &str) -> Result<Vec<T>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content.as_bytes());

    csv_reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|source| Error::Csv {
            name: source_name.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_parse_simple_csv() {
        let csv = "Code,Title\nopen,Open\nselective,Selective\n";
        let rows = parse_rows(csv, "method.csv").unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Code"], "open");
        assert_eq!(rows[1]["Title"], "Selective");
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["Code", "Title"]);
    }

    #[test]
    fn test_parse_mixed_line_endings() {
        let csv = "Code,Title\r\nopen,Open\rselective,Selective\nlimited,Limited";
        let rows = parse_rows(csv, "method.csv").unwrap();

        let codes: Vec<&str> = rows.iter().map(|r| r["Code"].as_str()).collect();
        assert_eq!(codes, vec!["open", "selective", "limited"]);
    }

    #[test]
    fn test_parse_quoted_newlines() {
        let csv = "Code,Description\nopen,\"Line one\nLine two\"\n";
        let rows = parse_rows(csv, "method.csv").unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Description"], "Line one\nLine two");
    }

    #[test]
    fn test_parse_short_and_long_rows() {
        let csv = "Code,Title,Description\nopen\nlimited,Limited,Desc,extra\n";
        let rows = parse_rows(csv, "method.csv").unwrap();

        assert_eq!(rows[0]["Title"], "");
        assert_eq!(rows[0]["Description"], "");
        assert_eq!(rows[1].len(), 3);
        assert_eq!(rows[1]["Description"], "Desc");
    }

    #[test]
    fn test_parse_header_only() {
        let rows = parse_rows("Code,Title\n", "empty.csv").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_parse_records() {
        #[derive(Deserialize)]
        struct Record {
            #[serde(rename = "Id")]
            id: String,
            #[serde(rename = "Core")]
            core: Option<String>,
        }

        let csv = "Id,Category,Core\nbids,tender,true\nlots,tender,\n";
        let records: Vec<Record> = parse_records(csv, "extensions.csv").unwrap();

        assert_eq!(records[0].id, "bids");
        assert_eq!(records[0].core.as_deref(), Some("true"));
        assert_eq!(records[1].core, None);
    }
}
