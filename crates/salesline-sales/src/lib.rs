//! Salesline Sales - extract and transform stages
//!
//! Reads a delimited sales file into raw rows, then cleans, validates and
//! enriches them into typed [`CleanSaleRecord`]s. Rows that fail a rule
//! are kept with their reasons in the rejected set; only structural
//! problems fail the batch.
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use salesline_sales::{ColumnMap, SalesPolicy, SourceConfig, extract, transform};
//!
//! let raw = extract(&SourceConfig::default())?;
//! let out = transform(&raw, &ColumnMap::default(), &SalesPolicy::default(), Utc::now())?;
//! println!("{} clean, {} rejected", out.clean.records.len(), out.rejected.len());
//! # Ok::<(), salesline_core::EtlError>(())
//! ```

pub mod config;
pub mod extract;
pub mod record;
pub mod schema;
pub mod staging;
pub mod transform;

pub use config::{ColumnMap, Delimiter, Encoding, QuantityPolicy, SalesPolicy, SourceConfig};
pub use extract::extract;
pub use record::{
    CANONICAL_TS, CleanRecordSet, CleanSaleRecord, RawRecordSet, RawSaleRecord, RejectReason,
    RejectedRecord, RevenueCategory, TIMESTAMP_YEARS,
};
pub use transform::{TransformReport, Transformed, parse_timestamp, transform};
