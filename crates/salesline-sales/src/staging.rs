//! Record sets <-> staged Parquet files

use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, RecordBatch,
    StringArray, TimestampSecondArray, UInt32Array, UInt64Array,
};
use chrono::{DateTime, Datelike, SecondsFormat, Utc};

use salesline_core::{EtlError, ParquetSink, read_parquet};

use crate::record::{
    CleanRecordSet, CleanSaleRecord, RawRecordSet, RawSaleRecord, RejectedRecord, RevenueCategory,
};
use crate::schema::{self, REASONS_COLUMN, ROW_COLUMN, RUN_AT_KEY};
use crate::transform::{month_name, weekday_name};

const ZSTD_LEVEL: i32 = 3;

fn write_one(path: &Path, batch: RecordBatch) -> Result<usize, EtlError> {
    let mut sink = ParquetSink::create(path, batch.schema(), ZSTD_LEVEL)?;
    if batch.num_rows() > 0 {
        sink.write_batch(&batch)?;
    }
    sink.finalize()
}

fn text_columns<'a>(
    records: impl Iterator<Item = &'a RawSaleRecord> + Clone,
    width: usize,
) -> Vec<ArrayRef> {
    (0..width)
        .map(|i| {
            let values: StringArray = records
                .clone()
                .map(|r| r.fields.get(i).and_then(|f| f.as_deref()))
                .collect();
            Arc::new(values) as ArrayRef
        })
        .collect()
}

/// Stage the extractor output. Returns rows written.
pub fn write_raw(path: &Path, set: &RawRecordSet) -> Result<usize, EtlError> {
    let rows: UInt64Array = set.records.iter().map(|r| Some(r.row)).collect();
    let mut columns: Vec<ArrayRef> = vec![Arc::new(rows)];
    columns.extend(text_columns(set.records.iter(), set.headers.len()));

    let batch = RecordBatch::try_new(schema::raw(&set.headers), columns)
        .map_err(|e| EtlError::staging(path, e))?;
    write_one(path, batch)
}

/// Stage rejected rows with their original cells and reasons.
pub fn write_rejected(
    path: &Path,
    headers: &[String],
    rejected: &[RejectedRecord],
) -> Result<usize, EtlError> {
    let rows: UInt64Array = rejected.iter().map(|r| Some(r.record.row)).collect();
    let reasons: StringArray = rejected.iter().map(|r| Some(r.reason_text())).collect();

    let mut columns: Vec<ArrayRef> = vec![Arc::new(rows)];
    columns.extend(text_columns(rejected.iter().map(|r| &r.record), headers.len()));
    columns.push(Arc::new(reasons));

    let batch = RecordBatch::try_new(schema::rejected(headers), columns)
        .map_err(|e| EtlError::staging(path, e))?;
    write_one(path, batch)
}

/// Stage the clean set, run time in the schema metadata.
pub fn write_clean(path: &Path, set: &CleanRecordSet) -> Result<usize, EtlError> {
    let r = &set.records;
    let run_at = set.run_at.to_rfc3339_opts(SecondsFormat::Secs, true);

    let columns: Vec<ArrayRef> = vec![
        Arc::new(r.iter().map(|s| Some(s.row)).collect::<UInt64Array>()),
        Arc::new(r.iter().map(|s| Some(s.order_id.as_str())).collect::<StringArray>()),
        Arc::new(r.iter().map(|s| Some(s.product_id.as_str())).collect::<StringArray>()),
        Arc::new(r.iter().map(|s| Some(s.customer_id.as_str())).collect::<StringArray>()),
        Arc::new(r.iter().map(|s| Some(s.quantity)).collect::<Int64Array>()),
        Arc::new(r.iter().map(|s| Some(s.unit_price)).collect::<Float64Array>()),
        Arc::new(
            r.iter()
                .map(|s| Some(s.sold_at.and_utc().timestamp()))
                .collect::<TimestampSecondArray>(),
        ),
        Arc::new(r.iter().map(|s| Some(s.total_price)).collect::<Float64Array>()),
        Arc::new(r.iter().map(|s| Some(s.avg_price_per_unit)).collect::<Float64Array>()),
        Arc::new(r.iter().map(|s| Some(s.year)).collect::<Int32Array>()),
        Arc::new(r.iter().map(|s| Some(s.month)).collect::<UInt32Array>()),
        Arc::new(r.iter().map(|s| Some(s.day)).collect::<UInt32Array>()),
        Arc::new(r.iter().map(|s| Some(s.day_of_week)).collect::<StringArray>()),
        Arc::new(r.iter().map(|s| Some(s.month_name)).collect::<StringArray>()),
        Arc::new(r.iter().map(|s| Some(s.is_weekend)).collect::<BooleanArray>()),
        Arc::new(r.iter().map(|s| Some(s.high_value_order)).collect::<BooleanArray>()),
        Arc::new(
            r.iter()
                .map(|s| Some(s.revenue_category.as_str()))
                .collect::<StringArray>(),
        ),
        Arc::new(r.iter().map(|s| Some(s.repeat_buyer)).collect::<BooleanArray>()),
        Arc::new(r.iter().map(|s| Some(s.flagged)).collect::<BooleanArray>()),
        Arc::new(r.iter().map(|s| s.flag_reason.as_deref()).collect::<StringArray>()),
    ];

    let batch = RecordBatch::try_new(schema::clean_with_run_at(&run_at), columns)
        .map_err(|e| EtlError::staging(path, e))?;
    write_one(path, batch)
}

fn column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    path: &Path,
) -> Result<&'a T, EtlError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| EtlError::staging(path, format!("column {name} missing or mistyped")))
}

fn opt_str(arr: &StringArray, i: usize) -> Option<String> {
    arr.is_valid(i).then(|| arr.value(i).to_string())
}

/// Read a staged raw set back.
pub fn read_raw(path: &Path) -> Result<RawRecordSet, EtlError> {
    let (schema, batches) = read_parquet(path)?;
    let headers: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|name| name != ROW_COLUMN)
        .collect();

    let mut records = Vec::new();
    for batch in &batches {
        let rows = column::<UInt64Array>(batch, ROW_COLUMN, path)?;
        let cols = headers
            .iter()
            .map(|h| column::<StringArray>(batch, h, path))
            .collect::<Result<Vec<_>, _>>()?;
        for i in 0..batch.num_rows() {
            records.push(RawSaleRecord {
                row: rows.value(i),
                fields: cols.iter().map(|c| opt_str(c, i)).collect(),
            });
        }
    }
    Ok(RawRecordSet { headers, records })
}

/// Read a staged clean set back.
///
/// Weekday and month names are recomputed from `sold_at`.
pub fn read_clean(path: &Path) -> Result<CleanRecordSet, EtlError> {
    let (schema, batches) = read_parquet(path)?;
    let run_at = schema
        .metadata()
        .get(RUN_AT_KEY)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| EtlError::staging(path, format!("missing {RUN_AT_KEY} metadata")))?;

    let mut records = Vec::new();
    for batch in &batches {
        let row = column::<UInt64Array>(batch, ROW_COLUMN, path)?;
        let order_id = column::<StringArray>(batch, "order_id", path)?;
        let product_id = column::<StringArray>(batch, "product_id", path)?;
        let customer_id = column::<StringArray>(batch, "customer_id", path)?;
        let quantity = column::<Int64Array>(batch, "quantity", path)?;
        let unit_price = column::<Float64Array>(batch, "unit_price", path)?;
        let sold_at = column::<TimestampSecondArray>(batch, "sold_at", path)?;
        let total_price = column::<Float64Array>(batch, "total_price", path)?;
        let avg_price = column::<Float64Array>(batch, "avg_price_per_unit", path)?;
        let is_weekend = column::<BooleanArray>(batch, "is_weekend", path)?;
        let high_value = column::<BooleanArray>(batch, "high_value_order", path)?;
        let category = column::<StringArray>(batch, "revenue_category", path)?;
        let repeat_buyer = column::<BooleanArray>(batch, "repeat_buyer", path)?;
        let flagged = column::<BooleanArray>(batch, "flagged", path)?;
        let flag_reason = column::<StringArray>(batch, "flag_reason", path)?;

        for i in 0..batch.num_rows() {
            let ts = DateTime::from_timestamp(sold_at.value(i), 0)
                .ok_or_else(|| EtlError::staging(path, "sold_at out of range"))?
                .naive_utc();
            let revenue_category = RevenueCategory::parse(category.value(i)).ok_or_else(|| {
                EtlError::staging(path, format!("unknown revenue category {:?}", category.value(i)))
            })?;
            records.push(CleanSaleRecord {
                row: row.value(i),
                order_id: order_id.value(i).to_string(),
                product_id: product_id.value(i).to_string(),
                customer_id: customer_id.value(i).to_string(),
                quantity: quantity.value(i),
                unit_price: unit_price.value(i),
                sold_at: ts,
                total_price: total_price.value(i),
                avg_price_per_unit: avg_price.value(i),
                year: ts.year(),
                month: ts.month(),
                day: ts.day(),
                day_of_week: weekday_name(ts.weekday()),
                month_name: month_name(ts.month()),
                is_weekend: is_weekend.value(i),
                high_value_order: high_value.value(i),
                revenue_category,
                repeat_buyer: repeat_buyer.value(i),
                flagged: flagged.value(i),
                flag_reason: opt_str(flag_reason, i),
            });
        }
    }
    Ok(CleanRecordSet { run_at, records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnMap, SalesPolicy};
    use crate::transform::transform;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn raw_set() -> RawRecordSet {
        RawRecordSet {
            headers: vec![
                "order_id".into(),
                "product_id".into(),
                "quantity".into(),
                "unit_price".into(),
                "timestamp".into(),
                "customer_id".into(),
            ],
            records: vec![
                RawSaleRecord {
                    row: 1,
                    fields: ["ORD1", "P1", "2", "9.99", "2024-01-01T10:00:00", "C1"]
                        .map(|s| Some(s.to_string()))
                        .to_vec(),
                },
                RawSaleRecord {
                    row: 2,
                    fields: vec![
                        Some("ORD2".into()),
                        Some("P2".into()),
                        Some("x".into()),
                        None,
                        None,
                        None,
                    ],
                },
            ],
        }
    }

    #[test]
    fn raw_survives_staging() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.parquet");
        let set = raw_set();
        assert_eq!(write_raw(&path, &set).unwrap(), 2);
        assert_eq!(read_raw(&path).unwrap(), set);
    }

    #[test]
    fn clean_survives_staging() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean.parquet");
        let run_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let out = transform(&raw_set(), &ColumnMap::default(), &SalesPolicy::default(), run_at)
            .unwrap();

        write_clean(&path, &out.clean).unwrap();
        let back = read_clean(&path).unwrap();
        assert_eq!(back, out.clean);
    }

    #[test]
    fn rejected_keeps_cells_and_reasons() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rejected.parquet");
        let set = raw_set();
        let out = transform(
            &set,
            &ColumnMap::default(),
            &SalesPolicy::default(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();

        assert_eq!(write_rejected(&path, &set.headers, &out.rejected).unwrap(), 1);
        let (_, batches) = read_parquet(&path).unwrap();
        let reasons = column::<StringArray>(&batches[0], REASONS_COLUMN, &path).unwrap();
        assert!(reasons.value(0).contains("quantity"));
        let ids = column::<StringArray>(&batches[0], "order_id", &path).unwrap();
        assert_eq!(ids.value(0), "ORD2");
    }

    #[test]
    fn empty_clean_set_is_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean.parquet");
        let set = CleanRecordSet {
            run_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            records: vec![],
        };
        assert_eq!(write_clean(&path, &set).unwrap(), 0);
        assert_eq!(read_clean(&path).unwrap(), set);
    }
}
