//! SQL generation for the sales target.
//!
//! Table names come from configuration, so they are checked by
//! [`validate_identifier`] before being spliced into statements. Values are
//! always bound as parameters.

/// Columns written per sale, in bind order of [`insert_sale`].
pub const SALE_COLUMNS: [&str; 20] = [
    "order_id",
    "product_id",
    "customer_id",
    "quantity",
    "unit_price",
    "sold_at",
    "total_price",
    "avg_price_per_unit",
    "year",
    "month",
    "day",
    "day_of_week",
    "month_name",
    "is_weekend",
    "high_value_order",
    "revenue_category",
    "repeat_buyer",
    "flagged",
    "flag_reason",
    "loaded_run_at",
];

/// Plain SQL identifier: ASCII letter or `_`, then letters, digits, `_`.
pub fn validate_identifier(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63;
    if valid {
        Ok(())
    } else {
        Err(format!("invalid table name {name:?}"))
    }
}

pub fn create_sales_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            order_id VARCHAR NOT NULL,
            product_id VARCHAR NOT NULL,
            customer_id VARCHAR NOT NULL,
            quantity BIGINT NOT NULL,
            unit_price DOUBLE NOT NULL,
            sold_at TIMESTAMP NOT NULL,
            total_price DOUBLE NOT NULL,
            avg_price_per_unit DOUBLE NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            day INTEGER NOT NULL,
            day_of_week VARCHAR NOT NULL,
            month_name VARCHAR NOT NULL,
            is_weekend BOOLEAN NOT NULL,
            high_value_order BOOLEAN NOT NULL,
            revenue_category VARCHAR NOT NULL,
            repeat_buyer BOOLEAN NOT NULL,
            flagged BOOLEAN NOT NULL,
            flag_reason VARCHAR,
            loaded_run_at TIMESTAMP NOT NULL,
            PRIMARY KEY (order_id),
            CHECK (flagged OR (quantity > 0 AND unit_price >= 0))
        )"
    )
}

pub fn create_summary_table(summary: &str) -> String {
    format!("CREATE TABLE IF NOT EXISTS {summary} ({SUMMARY_COLUMNS})")
}

const SUMMARY_COLUMNS: &str = "
    summary_date DATE NOT NULL,
    product_id VARCHAR NOT NULL,
    total_quantity BIGINT NOT NULL,
    total_sales DOUBLE NOT NULL,
    average_price DOUBLE NOT NULL,
    high_value_orders BIGINT NOT NULL,
    weekend_sales DOUBLE NOT NULL,
    repeat_buyer_orders BIGINT NOT NULL,
    PRIMARY KEY (summary_date, product_id)";

/// Business fields of a stored row, for change detection.
pub fn select_existing(table: &str) -> String {
    format!(
        "SELECT product_id, customer_id, quantity, unit_price, \
         strftime(sold_at, '%Y-%m-%dT%H:%M:%S'), total_price, avg_price_per_unit, \
         high_value_order, revenue_category, repeat_buyer, flagged, flag_reason \
         FROM {table} WHERE order_id = ?"
    )
}

pub fn insert_sale(table: &str) -> String {
    let cols = SALE_COLUMNS.join(", ");
    format!(
        "INSERT INTO {table} ({cols}) VALUES \
         (?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
         CAST(? AS TIMESTAMP))"
    )
}

/// Same bind order as [`insert_sale`], with `order_id` last.
pub fn update_sale(table: &str) -> String {
    let assignments = SALE_COLUMNS[1..]
        .iter()
        .map(|col| match *col {
            "sold_at" | "loaded_run_at" => format!("{col} = CAST(? AS TIMESTAMP)"),
            _ => format!("{col} = ?"),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {table} SET {assignments} WHERE order_id = ?")
}

/// Recompute the daily product summary from the sales table.
///
/// The table is replaced rather than emptied so its key index starts
/// fresh inside the load transaction. Flagged sales are excluded from the
/// aggregates.
pub fn rebuild_summary(table: &str, summary: &str) -> String {
    format!(
        "CREATE OR REPLACE TABLE {summary} ({SUMMARY_COLUMNS});
         INSERT INTO {summary}
         SELECT
             CAST(sold_at AS DATE) AS summary_date,
             product_id,
             SUM(quantity) AS total_quantity,
             SUM(total_price) AS total_sales,
             AVG(avg_price_per_unit) AS average_price,
             SUM(CASE WHEN high_value_order THEN 1 ELSE 0 END) AS high_value_orders,
             SUM(CASE WHEN is_weekend THEN total_price ELSE 0 END) AS weekend_sales,
             SUM(CASE WHEN repeat_buyer THEN 1 ELSE 0 END) AS repeat_buyer_orders
         FROM {table}
         WHERE NOT flagged
         GROUP BY 1, 2
         ORDER BY 1, 2;"
    )
}

pub fn count_rows(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {table}")
}
