//! Transformer: raw rows -> typed clean records + rejected rows
//!
//! Pure over its inputs. The scheduler's `run_at` only lands in
//! [`CleanRecordSet::run_at`] and the report; no record field depends on it.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc, Weekday};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use salesline_core::EtlError;

use crate::config::{ColumnMap, QuantityPolicy, SalesPolicy};
use crate::record::{
    CleanRecordSet, CleanSaleRecord, RawRecordSet, RawSaleRecord, RejectReason, RejectedRecord,
    RevenueCategory, TIMESTAMP_YEARS,
};

/// Transformer output.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub clean: CleanRecordSet,
    pub rejected: Vec<RejectedRecord>,
    pub report: TransformReport,
}

/// Counts written next to the staged clean set as `transform.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransformReport {
    pub run_at: Option<DateTime<Utc>>,
    pub input: usize,
    pub clean: usize,
    pub rejected: usize,
    pub flagged: usize,
    /// Rejection counts keyed by [`RejectReason::kind`]. A row with two
    /// reasons counts under both.
    pub by_reason: BTreeMap<String, usize>,
}

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub fn weekday_name(day: Weekday) -> &'static str {
    WEEKDAYS[day.num_days_from_monday() as usize]
}

/// `month` is 1-based.
pub fn month_name(month: u32) -> &'static str {
    MONTHS[(month.clamp(1, 12) - 1) as usize]
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a sale timestamp, truncated to whole seconds.
///
/// Offset timestamps (RFC 3339) are converted to UTC. A bare date means
/// midnight. Years outside [`TIMESTAMP_YEARS`] are refused.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    if !TIMESTAMP_YEARS.contains(&parsed.year()) {
        return None;
    }
    parsed.with_nanosecond(0)
}

/// Integer quantity. Integral floats like `"2.0"` are accepted.
fn parse_quantity(s: &str) -> Option<i64> {
    if let Ok(q) = s.parse::<i64>() {
        return Some(q);
    }
    let f = s.parse::<f64>().ok()?;
    let in_range = f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15;
    in_range.then_some(f as i64)
}

fn parse_price(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Header positions of the mapped columns.
struct Columns {
    order_id: usize,
    product_id: usize,
    quantity: usize,
    unit_price: usize,
    timestamp: usize,
    customer_id: Option<usize>,
}

impl Columns {
    fn resolve(raw: &RawRecordSet, map: &ColumnMap) -> Result<Self, EtlError> {
        let required = |name: &str| -> Result<usize, EtlError> {
            let missing = || EtlError::MissingColumn {
                column: name.to_string(),
            };
            let idx = raw.column_index(name).ok_or_else(missing)?;
            if raw.records.iter().any(|r| cell(r, idx).is_some()) {
                Ok(idx)
            } else {
                Err(missing())
            }
        };

        Ok(Self {
            order_id: required(&map.order_id)?,
            product_id: required(&map.product_id)?,
            quantity: required(&map.quantity)?,
            unit_price: required(&map.unit_price)?,
            timestamp: required(&map.timestamp)?,
            customer_id: raw.column_index(&map.customer_id),
        })
    }
}

/// Trimmed, non-empty cell text.
fn cell(record: &RawSaleRecord, idx: usize) -> Option<&str> {
    record
        .fields
        .get(idx)
        .and_then(|f| f.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Clean or reject a whole batch.
///
/// Fails only for batch-level problems: an empty record set, or a required
/// column that is absent from the header or blank in every row. Both
/// outputs keep source order.
pub fn transform(
    raw: &RawRecordSet,
    columns: &ColumnMap,
    policy: &SalesPolicy,
    run_at: DateTime<Utc>,
) -> Result<Transformed, EtlError> {
    if raw.is_empty() {
        return Err(EtlError::EmptyInput);
    }
    let cols = Columns::resolve(raw, columns)?;

    let mut clean = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();
    let mut first_seen: FxHashMap<String, u64> = FxHashMap::default();

    for record in &raw.records {
        let outcome = clean_record(record, &cols, policy).and_then(|sale| {
            match first_seen.get(&sale.order_id) {
                Some(&first_row) => Err(vec![RejectReason::DuplicateKey {
                    order_id: sale.order_id,
                    first_row,
                }]),
                None => {
                    first_seen.insert(sale.order_id.clone(), sale.row);
                    Ok(sale)
                }
            }
        });
        match outcome {
            Ok(sale) => clean.push(sale),
            Err(reasons) => {
                let rejected_record = RejectedRecord {
                    record: record.clone(),
                    reasons,
                };
                log::debug!(
                    "row {} rejected: {}",
                    record.row,
                    rejected_record.reason_text()
                );
                rejected.push(rejected_record);
            }
        }
    }

    mark_repeat_buyers(&mut clean, &policy.unknown_customer);

    let report = build_report(raw.len(), &clean, &rejected, run_at);
    log::info!(
        "transform: {} clean, {} rejected, {} flagged of {} rows",
        report.clean,
        report.rejected,
        report.flagged,
        report.input
    );

    Ok(Transformed {
        clean: CleanRecordSet {
            run_at,
            records: clean,
        },
        rejected,
        report,
    })
}

/// Apply the per-record rules, collecting every failure.
fn clean_record(
    record: &RawSaleRecord,
    cols: &Columns,
    policy: &SalesPolicy,
) -> Result<CleanSaleRecord, Vec<RejectReason>> {
    let mut reasons = Vec::new();
    let mut flags: Vec<String> = Vec::new();
    let flag_mode = policy.quantity_policy == QuantityPolicy::Flag;

    let order_id = cell(record, cols.order_id);
    if order_id.is_none() {
        reasons.push(RejectReason::MissingField { field: "order_id" });
    }
    let product_id = cell(record, cols.product_id).map(str::to_uppercase);
    if product_id.is_none() {
        reasons.push(RejectReason::MissingField {
            field: "product_id",
        });
    }

    let quantity = match cell(record, cols.quantity) {
        None => {
            reasons.push(RejectReason::MissingField { field: "quantity" });
            None
        }
        Some(text) => match parse_quantity(text) {
            None => {
                reasons.push(RejectReason::InvalidNumber {
                    field: "quantity",
                    value: text.to_string(),
                });
                None
            }
            Some(q) if q <= 0 => {
                let reason = RejectReason::NonPositiveQuantity { value: q };
                if flag_mode {
                    flags.push(reason.to_string());
                } else {
                    reasons.push(reason);
                }
                Some(q)
            }
            Some(q) if q > policy.max_quantity => {
                reasons.push(RejectReason::OutOfRange {
                    field: "quantity",
                    value: q.to_string(),
                    limit: policy.max_quantity.to_string(),
                });
                Some(q)
            }
            Some(q) => Some(q),
        },
    };

    let unit_price = match cell(record, cols.unit_price) {
        None => {
            reasons.push(RejectReason::MissingField {
                field: "unit_price",
            });
            None
        }
        Some(text) => match parse_price(text) {
            None => {
                reasons.push(RejectReason::InvalidNumber {
                    field: "unit_price",
                    value: text.to_string(),
                });
                None
            }
            Some(p) if p < 0.0 => {
                let reason = RejectReason::NegativePrice { value: p };
                if flag_mode {
                    flags.push(reason.to_string());
                } else {
                    reasons.push(reason);
                }
                Some(p)
            }
            Some(p) if p > policy.max_unit_price => {
                reasons.push(RejectReason::OutOfRange {
                    field: "unit_price",
                    value: p.to_string(),
                    limit: policy.max_unit_price.to_string(),
                });
                Some(p)
            }
            Some(p) => Some(p),
        },
    };

    let sold_at = match cell(record, cols.timestamp) {
        None => {
            reasons.push(RejectReason::MissingField { field: "timestamp" });
            None
        }
        Some(text) => {
            let parsed = parse_timestamp(text);
            if parsed.is_none() {
                reasons.push(RejectReason::InvalidTimestamp {
                    value: text.to_string(),
                });
            }
            parsed
        }
    };

    let (Some(order_id), Some(product_id), Some(quantity), Some(unit_price), Some(sold_at)) =
        (order_id, product_id, quantity, unit_price, sold_at)
    else {
        return Err(reasons);
    };
    if !reasons.is_empty() {
        return Err(reasons);
    }

    let customer_id = cols
        .customer_id
        .and_then(|idx| cell(record, idx))
        .map_or_else(|| policy.unknown_customer.clone(), str::to_string);

    let total_price = quantity as f64 * unit_price;
    let avg_price_per_unit = if quantity == 0 {
        unit_price
    } else {
        total_price / quantity as f64
    };
    let weekday = sold_at.weekday();

    Ok(CleanSaleRecord {
        row: record.row,
        order_id: order_id.to_string(),
        product_id,
        customer_id,
        quantity,
        unit_price,
        sold_at,
        total_price,
        avg_price_per_unit,
        year: sold_at.year(),
        month: sold_at.month(),
        day: sold_at.day(),
        day_of_week: weekday_name(weekday),
        month_name: month_name(sold_at.month()),
        is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
        high_value_order: total_price > policy.high_value_threshold,
        revenue_category: RevenueCategory::from_total(total_price),
        repeat_buyer: false,
        flagged: !flags.is_empty(),
        flag_reason: (!flags.is_empty()).then(|| flags.join("; ")),
    })
}

/// Same customer, same calendar day, more than one clean order.
fn mark_repeat_buyers(records: &mut [CleanSaleRecord], unknown_customer: &str) {
    let mut per_day: FxHashMap<(&str, NaiveDate), usize> = FxHashMap::default();
    for r in records.iter() {
        if r.customer_id != unknown_customer {
            *per_day.entry((&r.customer_id, r.sold_at.date())).or_default() += 1;
        }
    }
    let repeat: Vec<bool> = records
        .iter()
        .map(|r| {
            per_day
                .get(&(r.customer_id.as_str(), r.sold_at.date()))
                .is_some_and(|&n| n > 1)
        })
        .collect();
    for (r, is_repeat) in records.iter_mut().zip(repeat) {
        r.repeat_buyer = is_repeat;
    }
}

fn build_report(
    input: usize,
    clean: &[CleanSaleRecord],
    rejected: &[RejectedRecord],
    run_at: DateTime<Utc>,
) -> TransformReport {
    let mut by_reason = BTreeMap::new();
    for reason in rejected.iter().flat_map(|r| &r.reasons) {
        *by_reason.entry(reason.kind().to_string()).or_insert(0) += 1;
    }
    TransformReport {
        run_at: Some(run_at),
        input,
        clean: clean.len(),
        rejected: rejected.len(),
        flagged: clean.iter().filter(|r| r.flagged).count(),
        by_reason,
    }
}
