//! Arrow schemas of the staged record sets

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

/// Source row number column, prepended to raw and rejected files.
pub const ROW_COLUMN: &str = "__row";
/// `"; "`-joined rejection reasons, appended to the rejected file.
pub const REASONS_COLUMN: &str = "__reasons";
/// Schema metadata key holding the run time (RFC 3339) of a clean file.
pub const RUN_AT_KEY: &str = "salesline.run_at";

/// Raw rows: `__row` then one nullable text column per header.
pub fn raw(headers: &[String]) -> SchemaRef {
    Arc::new(Schema::new(raw_fields(headers)))
}

/// Raw columns plus `__reasons`.
pub fn rejected(headers: &[String]) -> SchemaRef {
    let mut fields = raw_fields(headers);
    fields.push(Field::new(REASONS_COLUMN, DataType::Utf8, false));
    Arc::new(Schema::new(fields))
}

fn raw_fields(headers: &[String]) -> Vec<Field> {
    std::iter::once(Field::new(ROW_COLUMN, DataType::UInt64, false))
        .chain(headers.iter().map(|h| Field::new(h, DataType::Utf8, true)))
        .collect()
}

/// Clean sales, one row per order.
pub static CLEAN: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(vec![
        Field::new(ROW_COLUMN, DataType::UInt64, false),
        // === Key and identifiers ===
        Field::new("order_id", DataType::Utf8, false),
        Field::new("product_id", DataType::Utf8, false),
        Field::new("customer_id", DataType::Utf8, false),
        // === Measures ===
        Field::new("quantity", DataType::Int64, false),
        Field::new("unit_price", DataType::Float64, false),
        Field::new("sold_at", DataType::Timestamp(TimeUnit::Second, None), false),
        Field::new("total_price", DataType::Float64, false),
        Field::new("avg_price_per_unit", DataType::Float64, false),
        // === Calendar ===
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::UInt32, false),
        Field::new("day", DataType::UInt32, false),
        Field::new("day_of_week", DataType::Utf8, false),
        Field::new("month_name", DataType::Utf8, false),
        Field::new("is_weekend", DataType::Boolean, false),
        // === Segments ===
        Field::new("high_value_order", DataType::Boolean, false),
        Field::new("revenue_category", DataType::Utf8, false),
        Field::new("repeat_buyer", DataType::Boolean, false),
        // === Policy ===
        Field::new("flagged", DataType::Boolean, false),
        Field::new("flag_reason", DataType::Utf8, true),
    ])
});

/// [`CLEAN`] tagged with the run time.
pub fn clean_with_run_at(run_at: &str) -> SchemaRef {
    let metadata = HashMap::from([(RUN_AT_KEY.to_string(), run_at.to_string())]);
    Arc::new(CLEAN.clone().with_metadata(metadata))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_prepends_row_number() {
        let schema = raw(&["order_id".into(), "quantity".into()]);
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec![ROW_COLUMN, "order_id", "quantity"]);
        assert!(schema.field(1).is_nullable());
    }

    #[test]
    fn rejected_appends_reasons() {
        let schema = rejected(&["order_id".into()]);
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.field(2).name(), REASONS_COLUMN);
    }

    #[test]
    fn clean_keyed_by_order_id() {
        assert!(CLEAN.index_of("order_id").is_ok());
        assert!(!CLEAN.field_with_name("order_id").unwrap().is_nullable());
        assert!(CLEAN.field_with_name("flag_reason").unwrap().is_nullable());
    }

    #[test]
    fn run_at_in_metadata() {
        let schema = clean_with_run_at("2024-01-02T03:00:00Z");
        assert_eq!(
            schema.metadata().get(RUN_AT_KEY).map(String::as_str),
            Some("2024-01-02T03:00:00Z")
        );
    }
}
