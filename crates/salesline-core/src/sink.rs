//! Parquet staging files: atomic writer and whole-file reader

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::error::EtlError;

/// Parquet writer that only becomes visible under its final name on `finalize`.
pub struct ParquetSink {
    writer: ArrowWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for ParquetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

impl ParquetSink {
    /// Open `{path}.tmp` for writing. A stale tmp file from a crashed run is replaced.
    pub fn create(path: &Path, schema: SchemaRef, zstd_level: i32) -> Result<Self, EtlError> {
        let final_path = path.to_path_buf();
        let mut tmp_name = final_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let level = ZstdLevel::try_new(zstd_level).map_err(|e| EtlError::staging(path, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .build();

        let file = File::create(&tmp_path)?;
        let writer =
            ArrowWriter::try_new(file, schema, Some(props)).map_err(|e| EtlError::staging(path, e))?;

        Ok(Self {
            writer,
            tmp_path,
            final_path,
            row_count: 0,
        })
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), EtlError> {
        self.row_count += batch.num_rows();
        self.writer
            .write(batch)
            .map_err(|e| EtlError::staging(&self.final_path, e))
    }

    /// Write the footer and rename tmp -> final. Returns rows written.
    pub fn finalize(self) -> Result<usize, EtlError> {
        let Self {
            writer,
            tmp_path,
            final_path,
            row_count,
        } = self;
        writer
            .close()
            .map_err(|e| EtlError::staging(&final_path, e))?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(row_count)
    }
}

/// Read a whole staged file. Returns the schema (with its metadata) and all batches.
pub fn read_parquet(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>), EtlError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EtlError::staging(path, "staged file missing"),
        _ => EtlError::Io(e),
    })?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| EtlError::staging(path, e))?;
    let schema = builder.schema().clone();
    let reader = builder.build().map_err(|e| EtlError::staging(path, e))?;

    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EtlError::staging(path, e))?;
    Ok((schema, batches))
}

/// Remove leftover `*.tmp` files from an interrupted stage.
pub fn cleanup_tmp_files(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use tempfile::TempDir;

    fn batch() -> RecordBatch {
        let schema = Schema::new_with_metadata(
            vec![
                Field::new("id", DataType::Int64, false),
                Field::new("name", DataType::Utf8, true),
            ],
            HashMap::from([("origin".to_string(), "test".to_string())]),
        );
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn finalize_renames_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.parquet");
        let b = batch();

        let mut sink = ParquetSink::create(&path, b.schema(), 3).unwrap();
        sink.write_batch(&b).unwrap();
        assert!(!path.exists());
        assert_eq!(sink.finalize().unwrap(), 3);

        assert!(path.exists());
        assert!(!dir.path().join("raw.parquet.tmp").exists());
        assert!(read_parquet(&path).is_ok());
    }

    #[test]
    fn read_back_keeps_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.parquet");
        let b = batch();
        let mut sink = ParquetSink::create(&path, b.schema(), 1).unwrap();
        sink.write_batch(&b).unwrap();
        sink.finalize().unwrap();

        let (schema, batches) = read_parquet(&path).unwrap();
        assert_eq!(schema.metadata().get("origin").map(String::as_str), Some("test"));
        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        assert_eq!(rows, 3);
    }

    #[test]
    fn read_missing_is_staging_error() {
        let dir = TempDir::new().unwrap();
        let err = read_parquet(&dir.path().join("nope.parquet")).unwrap_err();
        assert!(matches!(err, EtlError::Staging { .. }));
    }

    #[test]
    fn read_garbage_is_staging_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.parquet");
        std::fs::write(&path, b"not parquet").unwrap();
        let err = read_parquet(&path).unwrap_err();
        assert!(matches!(err, EtlError::Staging { .. }));
    }

    #[test]
    fn cleanup_only_touches_tmp() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.parquet.tmp"), b"stale").unwrap();
        std::fs::write(dir.path().join("b.parquet"), b"keep").unwrap();

        assert_eq!(cleanup_tmp_files(dir.path()).unwrap(), 1);
        assert!(dir.path().join("b.parquet").exists());
        assert!(!dir.path().join("a.parquet.tmp").exists());
    }
}
