//! Extract + transform over real files on disk

use std::path::Path;

use chrono::{TimeZone, Utc};
use salesline_core::EtlError;
use salesline_sales::{
    ColumnMap, QuantityPolicy, RejectReason, SalesPolicy, SourceConfig, extract, staging,
    transform,
};
use tempfile::TempDir;

const HEADER: &str = "order_id,product_id,quantity,unit_price,timestamp,customer_id";

fn write_csv(dir: &Path, body: &str) -> SourceConfig {
    let path = dir.join("rawsales.csv");
    std::fs::write(&path, format!("{HEADER}\n{body}")).unwrap();
    SourceConfig {
        path,
        ..Default::default()
    }
}

fn run_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
}

#[test]
fn two_row_example() {
    let dir = TempDir::new().unwrap();
    let source = write_csv(
        dir.path(),
        "ORD1,P1,2,9.99,2024-01-01T10:00:00,C1\nORD2,P2,-1,5.00,bad-timestamp,C2\n",
    );

    let raw = extract(&source).unwrap();
    assert_eq!(raw.len(), 2);

    let out = transform(&raw, &ColumnMap::default(), &SalesPolicy::default(), run_at()).unwrap();

    assert_eq!(out.clean.records.len(), 1);
    let ord1 = &out.clean.records[0];
    assert_eq!(ord1.order_id, "ORD1");
    assert!((ord1.total_price - 19.98).abs() < 1e-9);
    assert_eq!(ord1.sold_at_iso(), "2024-01-01T10:00:00");

    assert_eq!(out.rejected.len(), 1);
    let ord2 = &out.rejected[0];
    assert_eq!(ord2.record.fields[0].as_deref(), Some("ORD2"));
    let text = ord2.reason_text();
    assert!(text.contains("invalid quantity"), "{text}");
    assert!(text.contains("invalid timestamp"), "{text}");
}

#[test]
fn non_numeric_quantity_is_rejected_not_cleaned() {
    let dir = TempDir::new().unwrap();
    let source = write_csv(
        dir.path(),
        "A,P1,three,1.00,2024-01-01,C1\nB,P1,3,1.00,2024-01-01,C1\n",
    );
    let raw = extract(&source).unwrap();
    let out = transform(&raw, &ColumnMap::default(), &SalesPolicy::default(), run_at()).unwrap();

    assert!(out.clean.records.iter().all(|r| r.order_id != "A"));
    assert!(out.rejected.iter().any(|r| {
        r.record.fields[0].as_deref() == Some("A")
            && r.reasons.iter().any(|reason| {
                matches!(reason, RejectReason::InvalidNumber { field: "quantity", .. })
            })
    }));
}

#[test]
fn transform_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let source = write_csv(
        dir.path(),
        "A,p1,1,1.50,2024-02-03 04:05:06,C1\n\
         B,p2,x,1.50,2024-02-03,C1\n\
         C,p3,4,250.00,2024-02-03T09:00:00Z,C1\n\
         A,p1,1,1.50,2024-02-03 04:05:06,C1\n",
    );
    let raw = extract(&source).unwrap();
    let first = transform(&raw, &ColumnMap::default(), &SalesPolicy::default(), run_at()).unwrap();
    let later = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    let second = transform(&raw, &ColumnMap::default(), &SalesPolicy::default(), later).unwrap();

    assert_eq!(first.clean.records, second.clean.records);
    assert_eq!(first.rejected, second.rejected);
}

#[test]
fn derived_fields_hold_for_every_clean_record() {
    let dir = TempDir::new().unwrap();
    let body: String = (0..200)
        .map(|i| {
            format!(
                "O{i},P{},{},{}.{:02},2024-05-{:02}T12:00:00,C{}\n",
                i % 9,
                i % 13 - 2,
                i % 40,
                i % 100,
                i % 28 + 1,
                i % 17
            )
        })
        .collect();
    let source = write_csv(dir.path(), &body);
    let raw = extract(&source).unwrap();
    let out = transform(&raw, &ColumnMap::default(), &SalesPolicy::default(), run_at()).unwrap();

    assert_eq!(out.clean.records.len() + out.rejected.len(), 200);
    for r in &out.clean.records {
        assert!(r.quantity > 0);
        assert!(r.unit_price >= 0.0);
        assert!((r.total_price - r.quantity as f64 * r.unit_price).abs() < 1e-9);
    }
}

#[test]
fn flag_policy_loads_nonpositive_quantities() {
    let dir = TempDir::new().unwrap();
    let source = write_csv(dir.path(), "A,P1,0,1.00,2024-01-01,C1\nB,P1,2,1.00,2024-01-01,C2\n");
    let policy = SalesPolicy {
        quantity_policy: QuantityPolicy::Flag,
        ..Default::default()
    };
    let raw = extract(&source).unwrap();
    let out = transform(&raw, &ColumnMap::default(), &policy, run_at()).unwrap();

    assert!(out.rejected.is_empty());
    let flagged: Vec<_> = out.clean.records.iter().filter(|r| r.flagged).collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].order_id, "A");
}

#[test]
fn custom_columns_and_delimiter() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sales.tsv");
    std::fs::write(
        &path,
        "Order\tSKU\tQty\tPrice\tWhen\n9\tab-1\t2\t3.00\t2024-07-04T08:00:00\n",
    )
    .unwrap();
    let toml = format!(
        "path = {:?}\ndelimiter = \"tab\"\n",
        path.display().to_string()
    );
    let source: SourceConfig = toml::from_str(&toml).unwrap();
    let columns = ColumnMap {
        order_id: "Order".into(),
        product_id: "SKU".into(),
        quantity: "Qty".into(),
        unit_price: "Price".into(),
        timestamp: "When".into(),
        customer_id: "Customer".into(),
    };

    let raw = extract(&source).unwrap();
    let out = transform(&raw, &columns, &SalesPolicy::default(), run_at()).unwrap();
    let r = &out.clean.records[0];
    assert_eq!(r.product_id, "AB-1");
    assert_eq!(r.customer_id, "Unknown");
    assert_eq!(r.day_of_week, "Thursday");
}

#[test]
fn header_only_file_fails_transform() {
    let dir = TempDir::new().unwrap();
    let source = write_csv(dir.path(), "");
    let raw = extract(&source).unwrap();
    let err =
        transform(&raw, &ColumnMap::default(), &SalesPolicy::default(), run_at()).unwrap_err();
    assert!(matches!(err, EtlError::EmptyInput));
}

#[test]
fn staged_clean_set_matches_memory() {
    let dir = TempDir::new().unwrap();
    let source = write_csv(
        dir.path(),
        "ORD1,P1,2,9.99,2024-01-01T10:00:00,C1\nORD3,P1,1,600,2024-01-01T11:00:00,C1\n",
    );
    let raw = extract(&source).unwrap();
    let out = transform(&raw, &ColumnMap::default(), &SalesPolicy::default(), run_at()).unwrap();

    let path = dir.path().join("clean.parquet");
    staging::write_clean(&path, &out.clean).unwrap();
    let back = staging::read_clean(&path).unwrap();
    assert_eq!(back, out.clean);
    assert!(back.records.iter().all(|r| r.repeat_buyer));
}
