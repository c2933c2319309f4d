use sales_assistant::sales_data::{NO_RESULTS_MESSAGE, SalesData, TablePayload};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

// Build a small sales database on disk, then reopen it read-only.
async fn fixture() -> (TempDir, SalesData) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("contoso-sales.db");

    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to create fixture database");

    sqlx::query(
        "CREATE TABLE sales_data (
            id INTEGER PRIMARY KEY,
            main_category TEXT,
            product_type TEXT,
            region TEXT,
            year INTEGER,
            month INTEGER,
            revenue REAL
        )",
    )
    .execute(&pool)
    .await
    .expect("Failed to create table");

    let rows = [
        ("WINTER SPORTS", "SKIS", "EUROPE", 2023, 1, 1200.5),
        ("WINTER SPORTS", "SNOWBOARDS", "EUROPE", 2023, 2, 800.0),
        ("CLIMBING", "ROPES", "ASIA-PACIFIC", 2024, 1, 310.25),
        ("CLIMBING", "HARNESSES", "NORTH AMERICA", 2022, 6, 95.0),
    ];
    for (category, product, region, year, month, revenue) in rows {
        sqlx::query(
            "INSERT INTO sales_data (main_category, product_type, region, year, month, revenue)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(category)
        .bind(product)
        .bind(region)
        .bind(year)
        .bind(month)
        .bind(revenue)
        .execute(&pool)
        .await
        .expect("Failed to insert row");
    }
    pool.close().await;

    let sales = SalesData::connect(&path, 2)
        .await
        .expect("Failed to open fixture read-only");
    (dir, sales)
}

#[tokio::test]
async fn test_execute_returns_table_and_payload() {
    let (_dir, sales) = fixture().await;

    let result = sales
        .execute("SELECT region, SUM(revenue) AS revenue FROM sales_data GROUP BY region ORDER BY region")
        .await;

    let payload: TablePayload = serde_json::from_str(&result.json_format).expect("json payload");
    assert_eq!(payload.columns, vec!["region", "revenue"]);
    assert_eq!(payload.data.len(), 3);
    assert_eq!(payload.data[0][0], "ASIA-PACIFIC");

    let lines: Vec<&str> = result.display_format.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].contains("region"));
    assert!(result.display_format.contains("EUROPE"));
}

#[tokio::test]
async fn test_execute_without_rows() {
    let (_dir, sales) = fixture().await;

    let result = sales
        .execute("SELECT * FROM sales_data WHERE region = 'ANTARCTICA'")
        .await;

    assert_eq!(result.display_format, NO_RESULTS_MESSAGE);
    assert!(result.json_format.is_empty());
}

#[tokio::test]
async fn test_execute_reports_errors_in_band() {
    let (_dir, sales) = fixture().await;

    let result = sales.execute("SELECT * FROM missing_table").await;

    assert!(result.display_format.starts_with("Query failed with error:"));
    let payload: serde_json::Value = serde_json::from_str(&result.json_format).expect("json");
    assert_eq!(payload["query"], "SELECT * FROM missing_table");
    assert!(payload["error"].as_str().unwrap().contains("missing_table"));
}

#[tokio::test]
async fn test_empty_query_is_reported_with_its_text() {
    let (_dir, sales) = fixture().await;

    let result = sales.execute("").await;

    assert!(result.display_format.starts_with("Query failed with error:"));
    let payload: serde_json::Value = serde_json::from_str(&result.json_format).expect("json");
    assert_eq!(payload["query"], "");
    assert!(payload["error"].is_string());
}

#[tokio::test]
async fn test_connection_is_read_only() {
    let (_dir, sales) = fixture().await;

    let result = sales.execute("DELETE FROM sales_data").await;
    assert!(result.display_format.starts_with("Query failed with error:"));

    let count = sales.execute("SELECT COUNT(*) AS n FROM sales_data").await;
    let payload: TablePayload = serde_json::from_str(&count.json_format).expect("json");
    assert_eq!(payload.data[0][0], 4);
}

#[tokio::test]
async fn test_describe_schema_lists_tables_and_dimensions() {
    let (_dir, sales) = fixture().await;

    let schema = sales.describe_schema().await.expect("schema");

    assert!(schema.starts_with("Table sales_data Schema: Columns: id: INTEGER"));
    assert!(schema.contains("region: TEXT"));
    assert!(schema.contains("\nReporting Years: 2022, 2023, 2024"));
    assert!(schema.contains("\nRegions: "));
    assert!(schema.contains("NORTH AMERICA"));
    assert!(schema.contains("\nProduct Categories: "));
    assert!(schema.ends_with("\n\n"));
}

#[tokio::test]
async fn test_connect_missing_database_fails() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let result = SalesData::connect(dir.path().join("absent.db"), 1).await;
    assert!(result.is_err());
}
