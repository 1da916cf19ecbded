//! Source format, column mapping, and cleaning policy

use std::borrow::Cow;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Single-byte field delimiter. Written as a one-character string in TOML
/// (`","`, `";"`, `"\t"`, or the word `"tab"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Delimiter(u8);

impl Delimiter {
    pub const COMMA: Self = Self(b',');

    pub fn byte(self) -> u8 {
        self.0
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Self::COMMA
    }
}

impl TryFrom<String> for Delimiter {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.eq_ignore_ascii_case("tab") {
            return Ok(Self(b'\t'));
        }
        match s.as_bytes() {
            [b] if b.is_ascii() && *b != b'"' && *b != b'\n' && *b != b'\r' => Ok(Self(*b)),
            _ => Err(format!("delimiter must be a single ASCII character, got {s:?}")),
        }
    }
}

impl From<Delimiter> for String {
    fn from(d: Delimiter) -> Self {
        char::from(d.0).to_string()
    }
}

/// Text encoding of the input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl Encoding {
    /// Strict decode, used for the header row.
    pub fn decode_strict(self, bytes: &[u8]) -> Option<Cow<'_, str>> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
            Self::Latin1 => Some(self.decode(bytes)),
        }
    }

    /// Lossy decode for data fields; invalid bytes surface later as
    /// validation failures instead of aborting extraction.
    pub fn decode(self, bytes: &[u8]) -> Cow<'_, str> {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes),
            // ISO-8859-1 maps every byte to the code point of the same value
            Self::Latin1 => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

/// Where and how to read the sales file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub delimiter: Delimiter,
    pub encoding: Encoding,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/rawsales.csv"),
            delimiter: Delimiter::COMMA,
            encoding: Encoding::Utf8,
        }
    }
}

/// Header names of the fields the transformer reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub order_id: String,
    pub product_id: String,
    pub quantity: String,
    pub unit_price: String,
    pub timestamp: String,
    pub customer_id: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            order_id: "order_id".into(),
            product_id: "product_id".into(),
            quantity: "quantity".into(),
            unit_price: "unit_price".into(),
            timestamp: "timestamp".into(),
            customer_id: "customer_id".into(),
        }
    }
}

/// What to do with a record whose quantity is not positive or whose price is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityPolicy {
    /// Route the record to the rejected set.
    #[default]
    Reject,
    /// Keep the record, mark it `flagged`, and load it.
    Flag,
}

/// Cleaning rules applied by the transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SalesPolicy {
    pub quantity_policy: QuantityPolicy,
    /// Quantities above this are treated as outliers and rejected.
    pub max_quantity: i64,
    /// Unit prices above this are treated as outliers and rejected.
    pub max_unit_price: f64,
    /// `total_price` strictly above this marks a high value order.
    pub high_value_threshold: f64,
    /// Placeholder for a missing customer id.
    pub unknown_customer: String,
}

impl Default for SalesPolicy {
    fn default() -> Self {
        Self {
            quantity_policy: QuantityPolicy::Reject,
            max_quantity: 1000,
            max_unit_price: 10_000.0,
            high_value_threshold: 1000.0,
            unknown_customer: "Unknown".into(),
        }
    }
}
