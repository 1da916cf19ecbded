//! Extractor: delimited file -> [`RawRecordSet`]

use std::fs::File;
use std::path::Path;

use salesline_core::EtlError;

use crate::config::SourceConfig;
use crate::record::{RawRecordSet, RawSaleRecord};
use crate::schema::{REASONS_COLUMN, ROW_COLUMN};

/// Read the whole source file into memory, preserving row order.
///
/// Only structural problems fail: a missing file (`ResourceNotFound`) or an
/// unusable header (`MalformedInput`). Short rows, blank cells, and
/// undecodable bytes pass through for the transformer to judge.
pub fn extract(source: &SourceConfig) -> Result<RawRecordSet, EtlError> {
    let path = source.path.as_path();
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EtlError::ResourceNotFound {
            path: path.to_path_buf(),
        },
        _ => EtlError::Io(e),
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(source.delimiter.byte())
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers = read_headers(&mut reader, source, path)?;
    let width = headers.len();

    let mut records = Vec::new();
    let mut extra_fields = 0usize;
    for (idx, result) in reader.byte_records().enumerate() {
        let byte_record = result.map_err(|e| csv_error(e, path))?;
        if byte_record.len() > width {
            extra_fields += 1;
        }
        let fields = (0..width)
            .map(|i| {
                byte_record
                    .get(i)
                    .map(|bytes| source.encoding.decode(bytes).into_owned())
            })
            .collect();
        records.push(RawSaleRecord {
            row: idx as u64 + 1,
            fields,
        });
    }

    if extra_fields > 0 {
        log::debug!(
            "{}: {extra_fields} rows have more fields than the header; extras ignored",
            path.display()
        );
    }
    log::info!(
        "extract: {} rows x {} columns from {}",
        records.len(),
        width,
        path.display()
    );

    Ok(RawRecordSet { headers, records })
}

fn read_headers(
    reader: &mut csv::Reader<File>,
    source: &SourceConfig,
    path: &Path,
) -> Result<Vec<String>, EtlError> {
    let malformed = |reason: String| EtlError::MalformedInput {
        path: path.to_path_buf(),
        reason,
    };

    let raw = reader.byte_headers().map_err(|e| csv_error(e, path))?;
    let mut headers = Vec::with_capacity(raw.len());
    for (i, bytes) in raw.iter().enumerate() {
        let name = source
            .encoding
            .decode_strict(bytes)
            .ok_or_else(|| malformed(format!("header column {} is not valid text", i + 1)))?;
        headers.push(name.trim_start_matches('\u{feff}').trim().to_string());
    }

    if headers.iter().all(String::is_empty) {
        return Err(malformed("header row has no columns".into()));
    }
    if let Some(pos) = headers.iter().position(String::is_empty) {
        return Err(malformed(format!("header column {} is blank", pos + 1)));
    }
    for (i, name) in headers.iter().enumerate() {
        if headers[..i].iter().any(|h| h.eq_ignore_ascii_case(name)) {
            return Err(malformed(format!("duplicate header {name:?}")));
        }
        if [ROW_COLUMN, REASONS_COLUMN]
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
        {
            return Err(malformed(format!("header {name:?} is reserved")));
        }
    }
    Ok(headers)
}

fn csv_error(err: csv::Error, path: &Path) -> EtlError {
    match err.into_kind() {
        csv::ErrorKind::Io(e) => EtlError::Io(e),
        other => EtlError::MalformedInput {
            path: path.to_path_buf(),
            reason: format!("{other:?}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Delimiter, Encoding};
    use tempfile::TempDir;

    fn source_with(dir: &TempDir, name: &str, content: &[u8]) -> SourceConfig {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        SourceConfig {
            path,
            ..Default::default()
        }
    }

    #[test]
    fn missing_file_is_resource_not_found() {
        let dir = TempDir::new().unwrap();
        let source = SourceConfig {
            path: dir.path().join("absent.csv"),
            ..Default::default()
        };
        let err = extract(&source).unwrap_err();
        assert!(matches!(err, EtlError::ResourceNotFound { .. }));
    }

    #[test]
    fn empty_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, "empty.csv", b"");
        let err = extract(&source).unwrap_err();
        assert!(matches!(err, EtlError::MalformedInput { .. }));
    }

    #[test]
    fn duplicate_header_is_malformed() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, "dup.csv", b"order_id,ORDER_ID\n1,2\n");
        let err = extract(&source).unwrap_err();
        assert!(err.to_string().contains("duplicate header"));
    }

    #[test]
    fn reserved_header_is_malformed() {
        let dir = TempDir::new().unwrap();
        for header in ["__row", "__REASONS"] {
            let content = format!("order_id,{header}\n1,2\n");
            let source = source_with(&dir, "reserved.csv", content.as_bytes());
            let err = extract(&source).unwrap_err();
            assert!(matches!(err, EtlError::MalformedInput { .. }), "{header}");
            assert!(err.to_string().contains("reserved"));
        }
    }

    #[test]
    fn preserves_order_and_dirty_rows() {
        let dir = TempDir::new().unwrap();
        let source = source_with(
            &dir,
            "sales.csv",
            b"order_id,quantity,unit_price\nA,2,1.5\nB,abc\nC, 3 ,\n",
        );
        let set = extract(&source).unwrap();
        assert_eq!(set.headers, vec!["order_id", "quantity", "unit_price"]);
        assert_eq!(set.len(), 3);

        assert_eq!(set.records[0].row, 1);
        assert_eq!(set.records[1].fields[1].as_deref(), Some("abc"));
        // short row: missing trailing field is None, not ""
        assert_eq!(set.records[1].fields[2], None);
        // cells are kept verbatim, whitespace included
        assert_eq!(set.records[2].fields[1].as_deref(), Some(" 3 "));
        assert_eq!(set.records[2].fields[2].as_deref(), Some(""));
    }

    #[test]
    fn header_only_yields_empty_set() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, "h.csv", b"order_id,quantity\n");
        let set = extract(&source).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn configured_delimiter_and_encoding() {
        let dir = TempDir::new().unwrap();
        let mut source = source_with(&dir, "latin.csv", b"order_id;customer_id\nX1;Jos\xe9\n");
        source.delimiter = Delimiter::try_from(";".to_string()).unwrap();
        source.encoding = Encoding::Latin1;

        let set = extract(&source).unwrap();
        assert_eq!(set.records[0].fields[1].as_deref(), Some("José"));
    }

    #[test]
    fn bom_stripped_from_first_header() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, "bom.csv", b"\xef\xbb\xbforder_id,quantity\nA,1\n");
        let set = extract(&source).unwrap();
        assert_eq!(set.column_index("order_id"), Some(0));
    }
}
