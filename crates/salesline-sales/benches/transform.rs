use chrono::{TimeZone, Utc};
use salesline_sales::{ColumnMap, RawRecordSet, RawSaleRecord, SalesPolicy, transform};

/// Synthetic batch with one dirty row in ten.
fn batch(rows: usize) -> RawRecordSet {
    let headers = ["order_id", "product_id", "quantity", "unit_price", "timestamp", "customer_id"]
        .map(String::from)
        .to_vec();
    let records = (0..rows)
        .map(|i| {
            let quantity = if i % 10 == 9 { "-1".to_string() } else { (i % 7 + 1).to_string() };
            let fields = [
                format!("ORD{i}"),
                format!("p{}", i % 50),
                quantity,
                format!("{}.99", i % 300),
                format!("2024-{:02}-{:02}T{:02}:15:00", i % 12 + 1, i % 28 + 1, i % 24),
                format!("C{}", i % 400),
            ];
            RawSaleRecord {
                row: i as u64 + 1,
                fields: fields.into_iter().map(Some).collect(),
            }
        })
        .collect();
    RawRecordSet { headers, records }
}

#[divan::bench(args = [1_000, 100_000])]
fn transform_batch(bencher: divan::Bencher, rows: usize) {
    let raw = batch(rows);
    let columns = ColumnMap::default();
    let policy = SalesPolicy::default();
    let run_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    bencher.bench(|| transform(&raw, &columns, &policy, run_at).unwrap());
}

fn main() {
    divan::main();
}
