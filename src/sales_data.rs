//! Read-only query executor over the sales database.
//!
//! [`SalesData`] owns a pool of read-only SQLite connections opened once at
//! startup. Every query the agent issues goes through [`SalesData::execute`],
//! which never fails: errors come back inside the [`QueryResult`] so the agent
//! can see them and retry with a corrected query.
//!
//! [`SalesData::describe_schema`] is the startup-time introspection used to
//! build the agent's instructions.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Display text returned when a query matches nothing.
pub const NO_RESULTS_MESSAGE: &str = "The query returned no results. Try a different query.";

/// Table that carries the dimension columns enumerated in the schema description.
const FACT_TABLE: &str = "sales_data";

/// A dimension whose distinct values are listed in the schema description.
#[derive(Debug, Clone, Copy)]
struct Dimension {
    label: &'static str,
    column: &'static str,
    ordered: bool,
}

const DIMENSIONS: &[Dimension] = &[
    Dimension { label: "Regions", column: "region", ordered: false },
    Dimension { label: "Product Types", column: "product_type", ordered: false },
    Dimension { label: "Product Categories", column: "main_category", ordered: false },
    Dimension { label: "Reporting Years", column: "year", ordered: true },
];

/// Dual-format result of one ad-hoc query.
///
/// `display_format` is what the user sees in the tool audit surface.
/// `json_format` is the literal tool output handed back to the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub display_format: String,
    pub json_format: String,
}

impl QueryResult {
    /// Failure result carrying the error and the query that produced it.
    #[must_use]
    pub fn failure(error: impl std::fmt::Display, query: &str) -> Self {
        let error = error.to_string();
        Self {
            display_format: format!("Query failed with error: {error}"),
            json_format: serde_json::json!({ "error": error, "query": query }).to_string(),
        }
    }

    /// Result for a query that matched no rows.
    #[must_use]
    pub fn no_results() -> Self {
        Self {
            display_format: NO_RESULTS_MESSAGE.to_string(),
            json_format: String::new(),
        }
    }
}

/// Machine payload of a successful query: column order plus row values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePayload {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

/// Read-only handle on the sales database.
#[derive(Debug, Clone)]
pub struct SalesData {
    pool: SqlitePool,
}

impl SalesData {
    /// Open the database at `path` in read-only mode.
    pub async fn connect(path: impl AsRef<Path>, max_connections: u32) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open sales database at {}", path.display()))?;

        tracing::info!(path = %path.display(), "Database connection opened");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Close every connection in the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection closed");
    }

    /// Execute one query and render it in both formats.
    pub async fn execute(&self, query: &str) -> QueryResult {
        if query.trim().is_empty() {
            return QueryResult::failure("query is empty", query);
        }

        let rows = match sqlx::query(query).fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::debug!(error = %e, query = %query, "Query failed");
                return QueryResult::failure(e, query);
            }
        };

        let Some(first) = rows.first() else {
            return QueryResult::no_results();
        };

        let columns: Vec<String> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let data: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| (0..columns.len()).map(|i| cell_value(row, i)).collect())
            .collect();

        let display_format = render_table(&columns, &data);
        let payload = TablePayload { columns, data };

        match serde_json::to_string(&payload) {
            Ok(json_format) => QueryResult {
                display_format,
                json_format,
            },
            Err(e) => QueryResult::failure(e, query),
        }
    }

    /// Human-readable schema block injected into the agent instructions.
    ///
    /// Lists every user table with its columns, followed by the distinct
    /// values of the fixed dimension columns.
    pub async fn describe_schema(&self) -> anyhow::Result<String> {
        let mut lines = Vec::new();
        for table in self.table_names().await? {
            let columns = self
                .column_info(&table)
                .await?
                .into_iter()
                .map(|(name, ty)| format!("{name}: {ty}"))
                .collect::<Vec<_>>();
            lines.push(format!("Table {table} Schema: Columns: {}", columns.join(", ")));
        }

        let mut info = lines.join("\n");
        for dimension in DIMENSIONS {
            let values = self.distinct_values(dimension).await?;
            info.push_str(&format!("\n{}: {}", dimension.label, values.join(", ")));
        }
        info.push_str("\n\n");

        Ok(info)
    }

    async fn table_names(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("failed to list tables")?;

        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            if !name.starts_with("sqlite_") {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn column_info(&self, table: &str) -> anyhow::Result<Vec<(String, String)>> {
        let pragma = format!("PRAGMA table_info('{}')", table.replace('\'', "''"));
        let rows = sqlx::query(&pragma)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to read columns of {table}"))?;

        rows.iter()
            .map(|row| Ok((row.try_get("name")?, row.try_get("type")?)))
            .collect()
    }

    async fn distinct_values(&self, dimension: &Dimension) -> anyhow::Result<Vec<String>> {
        let order = if dimension.ordered {
            format!(" ORDER BY {}", dimension.column)
        } else {
            String::new()
        };
        let sql = format!(
            "SELECT DISTINCT {} FROM {FACT_TABLE}{order}",
            dimension.column
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to enumerate {}", dimension.column))?;

        Ok(rows.iter().map(|row| format_cell(&cell_value(row, 0))).collect())
    }
}

/// Decode one column of a row into JSON based on the value's storage class.
fn cell_value(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let decoded = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(index).map(Value::from),
        "REAL" | "NUMERIC" => row.try_get::<f64, _>(index).map(Value::from),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(BASE64.encode(bytes))),
        _ => row.try_get::<String, _>(index).map(Value::String),
    };

    decoded
        .or_else(|_| row.try_get::<String, _>(index).map(Value::String))
        .unwrap_or(Value::Null)
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::String(s) => s.replace(['\n', '\r'], " "),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) => format!("{f:.2}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Fixed-width text table: a header line followed by one line per row.
fn render_table(columns: &[String], rows: &[Vec<Value>]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(format_cell).collect())
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, header)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut lines = Vec::with_capacity(cells.len() + 1);
    lines.push(render_line(columns.iter(), &widths));
    for row in &cells {
        lines.push(render_line(row.iter(), &widths));
    }
    lines.join("\n")
}

fn render_line<'a>(values: impl Iterator<Item = &'a String>, widths: &[usize]) -> String {
    values
        .zip(widths.iter().copied())
        .map(|(value, width)| format!("{value:>width$}"))
        .collect::<Vec<_>>()
        .join("  ")
}
