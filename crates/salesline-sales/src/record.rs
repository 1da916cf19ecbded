//! Record types passed between stages

use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical timestamp format of a clean record.
pub const CANONICAL_TS: &str = "%Y-%m-%dT%H:%M:%S";

/// Years [`CANONICAL_TS`] renders as four unsigned digits.
pub const TIMESTAMP_YEARS: RangeInclusive<i32> = 1..=9999;

/// One data row exactly as read from the file.
///
/// `fields` is aligned with [`RawRecordSet::headers`]. `None` means the row
/// was shorter than the header; an empty cell is `Some("")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSaleRecord {
    /// 1-based data row number (header excluded).
    pub row: u64,
    pub fields: Vec<Option<String>>,
}

/// Extractor output: header plus rows in source order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecordSet {
    pub headers: Vec<String>,
    pub records: Vec<RawSaleRecord>,
}

impl RawRecordSet {
    /// Position of a header, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name.trim()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevenueCategory {
    Low,
    Medium,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl RevenueCategory {
    /// Bins: `(.., 100]` Low, `(100, 500]` Medium, `(500, 1000]` High, above Very High.
    pub fn from_total(total: f64) -> Self {
        if total <= 100.0 {
            Self::Low
        } else if total <= 500.0 {
            Self::Medium
        } else if total <= 1000.0 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::VeryHigh => "Very High",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Low" => Some(Self::Low),
            "Medium" => Some(Self::Medium),
            "High" => Some(Self::High),
            "Very High" => Some(Self::VeryHigh),
            _ => None,
        }
    }
}

impl fmt::Display for RevenueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, typed sale. Keyed by `order_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanSaleRecord {
    pub row: u64,
    pub order_id: String,
    pub product_id: String,
    pub customer_id: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub sold_at: NaiveDateTime,
    pub total_price: f64,
    pub avg_price_per_unit: f64,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub day_of_week: &'static str,
    pub month_name: &'static str,
    pub is_weekend: bool,
    pub high_value_order: bool,
    pub revenue_category: RevenueCategory,
    /// Same customer bought more than once on the same day within the batch.
    pub repeat_buyer: bool,
    /// Kept under [`QuantityPolicy::Flag`](crate::config::QuantityPolicy::Flag) despite a quantity/price rule.
    pub flagged: bool,
    pub flag_reason: Option<String>,
}

impl CleanSaleRecord {
    pub fn sold_at_iso(&self) -> String {
        self.sold_at.format(CANONICAL_TS).to_string()
    }

    /// `sold_at` renders as a plain `YYYY-MM-DDTHH:MM:SS` a SQL target can cast.
    pub fn has_canonical_timestamp(&self) -> bool {
        TIMESTAMP_YEARS.contains(&self.sold_at.year())
    }
}

/// Transformer output handed to the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecordSet {
    /// Scheduler-supplied run time. Audit metadata only.
    pub run_at: DateTime<Utc>,
    pub records: Vec<CleanSaleRecord>,
}

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    MissingField { field: &'static str },
    InvalidNumber { field: &'static str, value: String },
    InvalidTimestamp { value: String },
    NonPositiveQuantity { value: i64 },
    NegativePrice { value: f64 },
    OutOfRange { field: &'static str, value: String, limit: String },
    DuplicateKey { order_id: String, first_row: u64 },
}

impl RejectReason {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "missing_field",
            Self::InvalidNumber { .. } => "invalid_number",
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
            Self::NonPositiveQuantity { .. } => "non_positive_quantity",
            Self::NegativePrice { .. } => "negative_price",
            Self::OutOfRange { .. } => "out_of_range",
            Self::DuplicateKey { .. } => "duplicate_key",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing {field}"),
            Self::InvalidNumber { field, value } => {
                write!(f, "invalid {field}: {value:?} is not a number")
            }
            Self::InvalidTimestamp { value } => write!(f, "invalid timestamp: {value:?}"),
            Self::NonPositiveQuantity { value } => {
                write!(f, "invalid quantity: {value} is not positive")
            }
            Self::NegativePrice { value } => write!(f, "invalid unit_price: {value} is negative"),
            Self::OutOfRange { field, value, limit } => {
                write!(f, "{field} {value} exceeds limit {limit}")
            }
            Self::DuplicateKey {
                order_id,
                first_row,
            } => write!(f, "duplicate order_id {order_id:?} (first seen at row {first_row})"),
        }
    }
}

/// Original row plus every rule it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub record: RawSaleRecord,
    pub reasons: Vec<RejectReason>,
}

impl RejectedRecord {
    /// All reasons, `"; "`-separated.
    pub fn reason_text(&self) -> String {
        self.reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}
