//! End-to-end load runs against the in-memory database

use olist_etl::db::dialect::Dialect;
use olist_etl::db::memory::MemoryDatabase;
use olist_etl::source::TextEncoding;
use olist_etl::tables::{
    FieldSpec, LookupSpec, TableSpec, CUSTOMERS, ORDER_ITEMS, ORDER_REVIEWS, PRODUCTS,
};
use olist_etl::value::{FieldKind, Value};
use olist_etl::{EtlError, LoadOptions, LoadPipeline, LoadState};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

static ITEMS: TableSpec = TableSpec {
    name: "items",
    file_name: "items.csv",
    fields: &[
        FieldSpec::key("id", FieldKind::Text),
        FieldSpec::value("category", FieldKind::Text),
    ],
    conflict_key: &["id"],
    lookup: Some(LookupSpec {
        lookup_table: "categories",
        key_column: "category_name",
        value_column: "category_id",
        source_column: "category",
        target_column: "category_id",
    }),
    backfill: None,
};

const CATEGORY_QUERY: &str = "SELECT category_name, category_id FROM categories";

const CUSTOMER_HEADER: &str =
    "customer_id,customer_unique_id,customer_zip_code_prefix,customer_city,customer_state";

fn write_csv(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn customers_csv(ids: &[&str]) -> String {
    let mut csv = format!("{}\n", CUSTOMER_HEADER);
    for id in ids {
        csv.push_str(&format!("{},u-{},01310,sao paulo,SP\n", id, id));
    }
    csv
}

fn toys_lookup() -> MemoryDatabase {
    MemoryDatabase::new().stub_query(
        CATEGORY_QUERY,
        vec![vec![Value::Text("toys".to_string()), Value::Integer(7)]],
    )
}

#[tokio::test]
async fn test_accepts_rejects_and_orphans() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "items.csv", "id,category\nA,toys\n,toys\nC,unknown_cat\n");
    let mut db = toys_lookup();

    let mut pipeline = LoadPipeline::new(&ITEMS, LoadOptions::new(path).batch_size(10));
    let result = pipeline.run(&mut db).await.unwrap();

    assert_eq!(result.read, 3);
    assert_eq!(result.accepted, 2);
    assert_eq!(result.rejected(), 1);
    assert_eq!(result.rejected_missing_key, 1);
    assert_eq!(result.orphans, 1);
    assert_eq!(result.batches_committed, 1);
    assert_eq!(pipeline.state(), LoadState::Done);

    assert_eq!(db.queries(), 1);
    assert_eq!(db.execute_many_calls(), 1);
    assert_eq!(db.largest_insert(), 2);

    let rows = db.rows("items");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(0), Some(&Value::Text("A".to_string())));
    assert_eq!(rows[0].get(2), Some(&Value::Integer(7)));
    assert_eq!(rows[1].get(0), Some(&Value::Text("C".to_string())));
    assert_eq!(rows[1].get(2), Some(&Value::Null));
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "customers.csv", &customers_csv(&["a", "b", "c", "b"]));
    let mut db = MemoryDatabase::new();

    let first = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(&path).batch_size(2))
        .run(&mut db)
        .await
        .unwrap();
    assert_eq!(first.accepted, 4);
    assert_eq!(first.inserted, 3);
    assert_eq!(first.duplicates, 1);
    assert_eq!(db.row_count("customers"), 3);

    let second = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(&path).batch_size(2))
        .run(&mut db)
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped(), 4);
    assert_eq!(db.row_count("customers"), 3);
}

#[tokio::test]
async fn test_dry_run_never_touches_database() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "items.csv", "id,category\nA,toys\n,toys\nC,unknown_cat\n");
    let mut db = toys_lookup();
    let mut out: Vec<u8> = Vec::new();

    let options = LoadOptions::new(path).batch_size(10).dry_run(true);
    let result = LoadPipeline::new(&ITEMS, options)
        .execute(Some(&mut db), &mut out)
        .await
        .unwrap();

    assert!(result.dry_run);
    assert_eq!(result.total_would_load(), 2);
    assert_eq!(result.inserted, 0);
    assert_eq!(result.batches_committed, 0);
    assert_eq!(db.execute_many_calls(), 0);
    assert_eq!(db.queries(), 0);
    assert_eq!(db.commits(), 0);

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("[DRY_RUN] Table: items"));
    assert!(text.contains("[DRY_RUN] Batch 1: 2 rows"));
    assert!(text.contains(r#"  1. ("A", "toys", NULL)"#));
    assert!(text.contains("[DRY_RUN] Total rows to insert: 2"));
}

#[tokio::test]
async fn test_dry_run_without_database() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "customers.csv", &customers_csv(&["a", "b"]));
    let mut out: Vec<u8> = Vec::new();

    let result = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(path).dry_run(true))
        .execute(None, &mut out)
        .await
        .unwrap();
    assert_eq!(result.total_would_load(), 2);
}

#[tokio::test]
async fn test_live_run_requires_database() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "customers.csv", &customers_csv(&["a"]));
    let mut out: Vec<u8> = Vec::new();

    let err = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(path))
        .execute(None, &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, EtlError::Config(_)));
}

#[tokio::test]
async fn test_failed_batch_keeps_earlier_batches() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "customers.csv", &customers_csv(&["a", "b", "c", "d", "e"]));
    let mut db = MemoryDatabase::new().fail_on_execute_many(2);

    let mut pipeline = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(path).batch_size(2));
    let err = pipeline.run(&mut db).await.unwrap_err();

    assert_eq!(pipeline.state(), LoadState::Failed);
    assert_eq!(err.committed(), Some((1, 2)));
    match err {
        EtlError::WriteFailure { table, batch, .. } => {
            assert_eq!(table, "customers");
            assert_eq!(batch, 2);
        },
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(db.row_count("customers"), 2);
    assert_eq!(db.execute_many_calls(), 2);
    assert_eq!(db.rollbacks(), 1);
}

#[tokio::test]
async fn test_read_error_reports_committed_batches() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("customers.csv");
    let mut bytes = customers_csv(&["a", "b"]).into_bytes();
    bytes.extend_from_slice(b"c,u-c,01310,S\xE3o Paulo,SP\n");
    fs::write(&path, bytes).unwrap();
    let mut db = MemoryDatabase::new();

    let options = LoadOptions::new(path)
        .batch_size(1)
        .encoding(TextEncoding::Utf8);
    let mut pipeline = LoadPipeline::new(&CUSTOMERS, options);
    let err = pipeline.run(&mut db).await.unwrap_err();

    assert_eq!(pipeline.state(), LoadState::Failed);
    assert_eq!(err.committed(), Some((2, 2)));
    match err {
        EtlError::Aborted { table, source, .. } => {
            assert_eq!(table, "customers");
            assert!(matches!(*source, EtlError::SourceRead { line: 4, .. }));
        },
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(db.row_count("customers"), 2);
    assert_eq!(db.rollbacks(), 1);
}

#[tokio::test]
async fn test_backfill_failure_reports_committed_batches() {
    let dir = TempDir::new().unwrap();
    let csv = "review_id,order_id,review_score,review_comment_message,review_creation_date\n\
               r1,o1,5,otimo,2018-01-18 00:00:00\n\
               r2,o2,1,,2018-03-10 00:00:00\n";
    let path = write_csv(&dir, "reviews.csv", csv);
    // the unresolved-count query is not stubbed, so it fails
    let mut db = MemoryDatabase::new();

    let mut pipeline = LoadPipeline::new(&ORDER_REVIEWS, LoadOptions::new(path).batch_size(1));
    let err = pipeline.run(&mut db).await.unwrap_err();

    assert_eq!(pipeline.state(), LoadState::Failed);
    assert_eq!(err.committed(), Some((2, 2)));
    match err {
        EtlError::Aborted { source, .. } => {
            assert!(matches!(*source, EtlError::Database(_)));
        },
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(db.row_count("order_reviews"), 2);
    assert_eq!(db.rollbacks(), 1);
}

#[tokio::test]
async fn test_empty_source_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "customers.csv", &customers_csv(&[]));
    let mut db = MemoryDatabase::new();

    let mut pipeline = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(path));
    let result = pipeline.run(&mut db).await.unwrap();

    assert_eq!(result.read, 0);
    assert_eq!(result.accepted, 0);
    assert_eq!(result.skipped(), 0);
    assert_eq!(result.batches_committed, 0);
    assert_eq!(db.execute_many_calls(), 0);
    assert_eq!(pipeline.state(), LoadState::Done);
}

#[tokio::test]
async fn test_missing_source_fails_before_database_access() {
    let dir = TempDir::new().unwrap();
    let mut db = MemoryDatabase::new();

    let mut pipeline = LoadPipeline::new(&PRODUCTS, LoadOptions::new(dir.path().join("nope.csv")));
    let err = pipeline.run(&mut db).await.unwrap_err();

    assert!(matches!(err, EtlError::SourceNotFound { .. }));
    assert_eq!(pipeline.state(), LoadState::Failed);
    assert_eq!(db.queries(), 0);
    assert_eq!(db.execute_many_calls(), 0);
}

#[tokio::test]
async fn test_empty_file_is_malformed() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "customers.csv", "");
    let mut db = MemoryDatabase::new();

    let err = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(path))
        .run(&mut db)
        .await
        .unwrap_err();
    assert!(matches!(err, EtlError::MalformedHeader { .. }));
    assert_eq!(db.execute_many_calls(), 0);
}

#[tokio::test]
async fn test_byte_order_mark_is_stripped() {
    let dir = TempDir::new().unwrap();
    let csv = format!("\u{feff}{}", customers_csv(&["a", "b"]));
    let path = write_csv(&dir, "customers.csv", &csv);
    let mut db = MemoryDatabase::new();

    let result = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(path))
        .run(&mut db)
        .await
        .unwrap();
    assert_eq!(result.accepted, 2);
    assert_eq!(result.rejected(), 0);
}

#[tokio::test]
async fn test_lenient_payload_fields() {
    let dir = TempDir::new().unwrap();
    let csv = format!("{}\na,u-a,not-a-zip,  campinas  ,SP\n", CUSTOMER_HEADER);
    let path = write_csv(&dir, "customers.csv", &csv);
    let mut db = MemoryDatabase::new();

    let result = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(path))
        .run(&mut db)
        .await
        .unwrap();
    assert_eq!(result.accepted, 1);

    let row = &db.rows("customers")[0];
    assert_eq!(row.get(2), Some(&Value::Null));
    assert_eq!(row.get(3), Some(&Value::Text("campinas".to_string())));
}

#[tokio::test]
async fn test_composite_key() {
    let dir = TempDir::new().unwrap();
    let csv = "order_id,order_item_id,product_id,seller_id,shipping_limit_date,price,freight_value\n\
               o1,1,p1,s1,2017-09-19 09:45:35,58.90,13.29\n\
               o1,2,p2,s1,2017-09-19 09:45:35,10.00,2.00\n\
               o1,1,p1,s1,2017-09-19 09:45:35,58.90,13.29\n\
               o2,x,p3,s2,2017-05-03 11:05:13,239.90,19.93\n\
               o3,,p3,s2,2017-05-03 11:05:13,239.90,19.93\n";
    let path = write_csv(&dir, "order_items.csv", csv);
    let mut db = MemoryDatabase::new();

    let result = LoadPipeline::new(&ORDER_ITEMS, LoadOptions::new(path))
        .run(&mut db)
        .await
        .unwrap();

    assert_eq!(result.read, 5);
    assert_eq!(result.accepted, 3);
    assert_eq!(result.rejected_invalid_type, 1);
    assert_eq!(result.rejected_missing_key, 1);
    assert_eq!(result.duplicates, 1);
    assert_eq!(db.row_count("order_items"), 2);
}

#[tokio::test]
async fn test_review_backfill() {
    let dir = TempDir::new().unwrap();
    let csv = "review_id,order_id,review_score,review_comment_message,review_creation_date\n\
               r1,o1,5,otimo,2018-01-18 00:00:00\n\
               r2,o2,1,,2018-03-10 00:00:00\n\
               r3,,4,sem pedido,2018-03-10 00:00:00\n";
    let path = write_csv(&dir, "reviews.csv", csv);
    let mut db = MemoryDatabase::new().stub_query(
        "SELECT COUNT(*) FROM order_reviews WHERE customer_id IS NULL",
        vec![vec![Value::Integer(1)]],
    );

    let result = LoadPipeline::new(&ORDER_REVIEWS, LoadOptions::new(path))
        .run(&mut db)
        .await
        .unwrap();

    assert_eq!(result.accepted, 2);
    assert_eq!(result.rejected_missing_key, 1);
    assert_eq!(result.backfill_unresolved, Some(1));

    let backfill = ORDER_REVIEWS.backfill.unwrap();
    assert_eq!(
        db.statements(),
        &[Dialect::Postgres.backfill("order_reviews", &backfill)]
    );
    // one batch commit plus the backfill commit
    assert_eq!(db.commits(), 2);
}

#[tokio::test]
async fn test_backfill_skipped_in_dry_run() {
    let dir = TempDir::new().unwrap();
    let csv = "review_id,order_id,review_score,review_comment_message,review_creation_date\n\
               r1,o1,5,otimo,2018-01-18 00:00:00\n";
    let path = write_csv(&dir, "reviews.csv", csv);
    let mut db = MemoryDatabase::new();
    let mut out: Vec<u8> = Vec::new();

    let result = LoadPipeline::new(&ORDER_REVIEWS, LoadOptions::new(path).dry_run(true))
        .execute(Some(&mut db), &mut out)
        .await
        .unwrap();

    assert_eq!(result.backfill_unresolved, None);
    assert!(db.statements().is_empty());
    assert_eq!(db.queries(), 0);
}

#[tokio::test]
async fn test_large_batch_is_split_into_statements() {
    let dir = TempDir::new().unwrap();
    let ids: Vec<String> = (0..20_000).map(|i| format!("c{}", i)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let path = write_csv(&dir, "customers.csv", &customers_csv(&refs));
    let mut db = MemoryDatabase::new();

    let statement = CUSTOMERS.upsert_statement();
    let result = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(path).batch_size(20_000))
        .run(&mut db)
        .await
        .unwrap();

    assert_eq!(result.batches_committed, 1);
    assert_eq!(result.inserted, 20_000);
    assert_eq!(db.commits(), 1);
    assert_eq!(db.execute_many_calls(), 2);
    assert_eq!(db.largest_insert(), statement.rows_per_statement());
}

#[tokio::test]
async fn test_memory_bounded_by_batch_size() {
    let dir = TempDir::new().unwrap();
    let ids: Vec<String> = (0..50_000).map(|i| format!("c{}", i)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let path = write_csv(&dir, "customers.csv", &customers_csv(&refs));
    let mut db = MemoryDatabase::new();

    let result = LoadPipeline::new(&CUSTOMERS, LoadOptions::new(path).batch_size(1_000))
        .run(&mut db)
        .await
        .unwrap();

    assert_eq!(result.accepted, 50_000);
    assert_eq!(result.batches_committed, 50);
    assert_eq!(result.committed_rows, 50_000);
    assert!(db.largest_insert() <= 1_000);
    assert_eq!(db.row_count("customers"), 50_000);
}
