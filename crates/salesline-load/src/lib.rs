//! salesline-load: idempotent loader for clean sales
//!
//! Upserts a [`CleanRecordSet`] into a DuckDB sales table keyed by
//! `order_id`, then rebuilds the daily product summary, all inside one
//! transaction. Loading the same set twice leaves the target unchanged.

mod config;
pub mod sql;

pub use config::{ConflictPolicy, TargetConfig};

use chrono::SecondsFormat;
use duckdb::{Connection, params};
use serde::{Deserialize, Serialize};

use salesline_core::EtlError;
use salesline_sales::{CleanRecordSet, CleanSaleRecord};

/// A record the target refused on its own, without aborting the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub order_id: String,
    pub row: u64,
    pub reason: String,
}

/// Counts from one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: Vec<RecordFailure>,
}

/// Stored business fields, compared against an incoming record.
#[derive(Debug, PartialEq)]
struct StoredSale {
    product_id: String,
    customer_id: String,
    quantity: i64,
    unit_price: f64,
    sold_at: String,
    total_price: f64,
    avg_price_per_unit: f64,
    high_value_order: bool,
    revenue_category: String,
    repeat_buyer: bool,
    flagged: bool,
    flag_reason: Option<String>,
}

impl StoredSale {
    fn of(r: &CleanSaleRecord) -> Self {
        Self {
            product_id: r.product_id.clone(),
            customer_id: r.customer_id.clone(),
            quantity: r.quantity,
            unit_price: r.unit_price,
            sold_at: r.sold_at_iso(),
            total_price: r.total_price,
            avg_price_per_unit: r.avg_price_per_unit,
            high_value_order: r.high_value_order,
            revenue_category: r.revenue_category.as_str().to_string(),
            repeat_buyer: r.repeat_buyer,
            flagged: r.flagged,
            flag_reason: r.flag_reason.clone(),
        }
    }
}

fn config_error(message: String) -> EtlError {
    EtlError::Config(message)
}

fn store_error(e: duckdb::Error) -> EtlError {
    EtlError::Store {
        message: e.to_string(),
    }
}

/// Classify a failed write of `order_id`.
fn write_error(order_id: &str, e: duckdb::Error) -> EtlError {
    let message = e.to_string();
    if message.contains("Constraint Error") {
        EtlError::ConstraintViolation {
            key: order_id.to_string(),
            message,
        }
    } else {
        EtlError::Store { message }
    }
}

/// Open the target database.
///
/// A missing parent directory or an unopenable file (locked by another
/// writer, unreadable) is a connection error.
pub fn connect(target: &TargetConfig) -> Result<Connection, EtlError> {
    let name = target.database.display().to_string();
    let conn_err = |message: String| EtlError::Connection {
        target: name.clone(),
        message,
    };

    let conn = if target.is_in_memory() {
        Connection::open_in_memory().map_err(|e| conn_err(e.to_string()))?
    } else {
        if let Some(parent) = target.database.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(conn_err(format!(
                    "directory {} does not exist",
                    parent.display()
                )));
            }
        }
        Connection::open(&target.database).map_err(|e| conn_err(e.to_string()))?
    };

    if let Some(limit) = &target.memory_limit {
        if limit.contains(['\'', '"', ';']) {
            return Err(config_error(format!("invalid memory_limit {limit:?}")));
        }
        conn.execute_batch(&format!("SET memory_limit = '{limit}';"))
            .map_err(|e| config_error(format!("memory_limit {limit:?}: {e}")))?;
    }
    Ok(conn)
}

/// Violations the target would reject, checked before writing so one bad
/// record does not abort the transaction.
fn check_constraints(r: &CleanSaleRecord) -> Option<String> {
    if r.order_id.is_empty() || r.product_id.is_empty() || r.customer_id.is_empty() {
        return Some("empty key or identifier".into());
    }
    if !r.unit_price.is_finite() || !r.total_price.is_finite() {
        return Some("non-finite amount".into());
    }
    if !r.has_canonical_timestamp() {
        return Some(format!("sold_at {} outside years 1..=9999", r.sold_at));
    }
    if !r.flagged && (r.quantity <= 0 || r.unit_price < 0.0) {
        return Some(format!(
            "unflagged sale with quantity {} and unit_price {}",
            r.quantity, r.unit_price
        ));
    }
    None
}

/// Connect to the target and load `set`.
pub fn load(set: &CleanRecordSet, target: &TargetConfig) -> Result<LoadResult, EtlError> {
    let mut conn = connect(target)?;
    load_into(&mut conn, set, target)
}

/// Load `set` through an open connection.
///
/// The whole batch is one transaction. A record failing the target's
/// constraints is reported in [`LoadResult::failed`] and skipped; any error
/// the store raises mid-batch rolls everything back.
pub fn load_into(
    conn: &mut Connection,
    set: &CleanRecordSet,
    target: &TargetConfig,
) -> Result<LoadResult, EtlError> {
    validate_identifier(&target.table)?;
    validate_identifier(&target.summary_table)?;

    conn.execute_batch(&format!(
        "{};\n{};",
        sql::create_sales_table(&target.table),
        sql::create_summary_table(&target.summary_table)
    ))
    .map_err(store_error)?;

    let run_at = set.run_at.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string();
    log::info!(
        "load: {} records into {} (run {})",
        set.records.len(),
        target.table,
        set.run_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    let tx = conn.transaction().map_err(store_error)?;
    let mut result = LoadResult::default();
    {
        let mut select = tx
            .prepare(&sql::select_existing(&target.table))
            .map_err(store_error)?;
        let mut insert = tx
            .prepare(&sql::insert_sale(&target.table))
            .map_err(store_error)?;
        let mut update = tx
            .prepare(&sql::update_sale(&target.table))
            .map_err(store_error)?;

        for r in &set.records {
            if let Some(reason) = check_constraints(r) {
                log::warn!("order {} (row {}) not loaded: {reason}", r.order_id, r.row);
                result.failed.push(RecordFailure {
                    order_id: r.order_id.clone(),
                    row: r.row,
                    reason,
                });
                continue;
            }

            let existing = match select.query_row(params![r.order_id], |row| {
                Ok(StoredSale {
                    product_id: row.get(0)?,
                    customer_id: row.get(1)?,
                    quantity: row.get(2)?,
                    unit_price: row.get(3)?,
                    sold_at: row.get(4)?,
                    total_price: row.get(5)?,
                    avg_price_per_unit: row.get(6)?,
                    high_value_order: row.get(7)?,
                    revenue_category: row.get(8)?,
                    repeat_buyer: row.get(9)?,
                    flagged: row.get(10)?,
                    flag_reason: row.get(11)?,
                })
            }) {
                Ok(stored) => Some(stored),
                Err(duckdb::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(store_error(e)),
            };

            let sold_at = r.sold_at_iso();
            match existing {
                None => {
                    insert
                        .execute(params![
                            r.order_id,
                            r.product_id,
                            r.customer_id,
                            r.quantity,
                            r.unit_price,
                            sold_at,
                            r.total_price,
                            r.avg_price_per_unit,
                            r.year,
                            r.month as i32,
                            r.day as i32,
                            r.day_of_week,
                            r.month_name,
                            r.is_weekend,
                            r.high_value_order,
                            r.revenue_category.as_str(),
                            r.repeat_buyer,
                            r.flagged,
                            r.flag_reason,
                            run_at,
                        ])
                        .map_err(|e| write_error(&r.order_id, e))?;
                    result.inserted += 1;
                }
                Some(stored) if stored == StoredSale::of(r) => result.skipped += 1,
                Some(_) if target.on_conflict == ConflictPolicy::Skip => result.skipped += 1,
                Some(_) => {
                    update
                        .execute(params![
                            r.product_id,
                            r.customer_id,
                            r.quantity,
                            r.unit_price,
                            sold_at,
                            r.total_price,
                            r.avg_price_per_unit,
                            r.year,
                            r.month as i32,
                            r.day as i32,
                            r.day_of_week,
                            r.month_name,
                            r.is_weekend,
                            r.high_value_order,
                            r.revenue_category.as_str(),
                            r.repeat_buyer,
                            r.flagged,
                            r.flag_reason,
                            run_at,
                            r.order_id,
                        ])
                        .map_err(|e| write_error(&r.order_id, e))?;
                    result.updated += 1;
                }
            }
        }
    }

    tx.execute_batch(&sql::rebuild_summary(
        &target.table,
        &target.summary_table,
    ))
    .map_err(store_error)?;
    tx.commit().map_err(store_error)?;

    log::info!(
        "load: {} inserted, {} updated, {} skipped, {} failed",
        result.inserted,
        result.updated,
        result.skipped,
        result.failed.len()
    );
    Ok(result)
}

fn validate_identifier(name: &str) -> Result<(), EtlError> {
    sql::validate_identifier(name).map_err(config_error)
}

/// Row count of a table, for reporting.
pub fn count_rows(conn: &Connection, table: &str) -> Result<u64, EtlError> {
    validate_identifier(table)?;
    let n: i64 = conn
        .query_row(&sql::count_rows(table), [], |row| row.get(0))
        .map_err(store_error)?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use salesline_sales::RevenueCategory;

    fn sale(order_id: &str, quantity: i64, unit_price: f64) -> CleanSaleRecord {
        let sold_at = NaiveDate::from_ymd_opt(2024, 1, 6)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let total = quantity as f64 * unit_price;
        CleanSaleRecord {
            row: 1,
            order_id: order_id.into(),
            product_id: "P1".into(),
            customer_id: "C1".into(),
            quantity,
            unit_price,
            sold_at,
            total_price: total,
            avg_price_per_unit: unit_price,
            year: 2024,
            month: 1,
            day: 6,
            day_of_week: "Saturday",
            month_name: "January",
            is_weekend: true,
            high_value_order: false,
            revenue_category: RevenueCategory::from_total(total),
            repeat_buyer: false,
            flagged: false,
            flag_reason: None,
        }
    }

    fn set(records: Vec<CleanSaleRecord>) -> CleanRecordSet {
        CleanRecordSet {
            run_at: Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap(),
            records,
        }
    }

    fn memory_target() -> TargetConfig {
        TargetConfig {
            database: ":memory:".into(),
            ..Default::default()
        }
    }

    #[test]
    fn constraint_precheck() {
        assert!(check_constraints(&sale("A", 1, 1.0)).is_none());
        assert!(check_constraints(&sale("A", 0, 1.0)).is_some());
        assert!(check_constraints(&sale("", 1, 1.0)).is_some());
        let mut flagged = sale("A", -1, 1.0);
        flagged.flagged = true;
        assert!(check_constraints(&flagged).is_none());
        let mut far_future = sale("A", 1, 1.0);
        far_future.sold_at = NaiveDate::from_ymd_opt(12345, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(check_constraints(&far_future).is_some());
    }

    #[test]
    fn stored_sale_detects_changes() {
        let a = sale("A", 2, 3.0);
        let mut b = a.clone();
        assert_eq!(StoredSale::of(&a), StoredSale::of(&b));
        b.unit_price = 3.5;
        assert_ne!(StoredSale::of(&a), StoredSale::of(&b));
    }

    #[test]
    fn in_memory_insert_then_skip() {
        let target = memory_target();
        let mut conn = connect(&target).unwrap();
        let batch = set(vec![sale("A", 1, 2.0), sale("B", 2, 3.0)]);

        let first = load_into(&mut conn, &batch, &target).unwrap();
        assert_eq!((first.inserted, first.updated, first.skipped), (2, 0, 0));

        let second = load_into(&mut conn, &batch, &target).unwrap();
        assert_eq!((second.inserted, second.updated, second.skipped), (0, 0, 2));
        assert_eq!(count_rows(&conn, "sales").unwrap(), 2);
    }

    #[test]
    fn invalid_record_reported_not_fatal() {
        let target = memory_target();
        let mut conn = connect(&target).unwrap();
        let batch = set(vec![sale("A", 1, 2.0), sale("B", 0, 3.0)]);

        let result = load_into(&mut conn, &batch, &target).unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].order_id, "B");
    }

    #[test]
    fn bad_table_name_is_config_error() {
        let target = TargetConfig {
            table: "sales; DROP".into(),
            ..memory_target()
        };
        let mut conn = connect(&target).unwrap();
        let err = load_into(&mut conn, &set(vec![]), &target).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn quoted_memory_limit_rejected() {
        let target = TargetConfig {
            memory_limit: Some("1GB'; DROP".into()),
            ..memory_target()
        };
        assert!(matches!(connect(&target), Err(EtlError::Config(_))));
    }
}
