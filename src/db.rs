//! Row-oriented access to the hosted Postgres backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::models::Row;

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid column name `{0}`")]
    InvalidColumn(String),

    #[error("unexpected row shape from {table}: {value}")]
    RowShape { table: &'static str, value: String },

    #[error("failed to read fixture: {0}")]
    Fixture(String),

    #[error("{0}")]
    Upstream(String),
}

/// The row sets the dashboard reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    UserDishes,
    UserComments,
    Foods,
    /// Server-maintained view of foods close to expiry.
    ExpiringFoods,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::UserDishes,
        Table::UserComments,
        Table::Foods,
        Table::ExpiringFoods,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::UserDishes => "user_dishes",
            Table::UserComments => "user_comments",
            Table::Foods => "foods",
            Table::ExpiringFoods => "expiring_foods",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Table::ALL.into_iter().find(|table| table.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// A select against one table. Empty `columns` means every column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: Table,
    pub columns: Vec<String>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            columns: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|column| column.to_string()).collect();
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_sql(&self) -> Result<String, DataSourceError> {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|column| quote_ident(column))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        };

        let mut sql = format!("SELECT {columns} FROM public.{}", self.table.name());
        if let Some(order) = &self.order {
            let direction = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY {} {direction}", quote_ident(&order.column)?));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        Ok(format!("SELECT row_to_json(t) FROM ({sql}) t"))
    }
}

fn quote_ident(column: &str) -> Result<String, DataSourceError> {
    let valid = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(DataSourceError::InvalidColumn(column.to_string()));
    }
    Ok(format!("\"{column}\""))
}

/// The backend as the dashboard sees it. Any error is fatal for the call
/// that hit it.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, DataSourceError>;

    async fn count(&self, table: Table) -> Result<u64, DataSourceError>;

    async fn delete_by_id(&self, table: Table, id: &Value) -> Result<(), DataSourceError>;
}

pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataSource for PgSource {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, DataSourceError> {
        let sql = query.to_sql()?;
        tracing::debug!(%sql, "select");

        let values: Vec<Value> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        values
            .into_iter()
            .map(|value| match value {
                Value::Object(row) => Ok(row),
                other => Err(DataSourceError::RowShape {
                    table: query.table.name(),
                    value: other.to_string(),
                }),
            })
            .collect()
    }

    async fn count(&self, table: Table) -> Result<u64, DataSourceError> {
        let sql = format!("SELECT COUNT(*) FROM public.{}", table.name());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_by_id(&self, table: Table, id: &Value) -> Result<(), DataSourceError> {
        let sql = format!("DELETE FROM public.{} WHERE id::text = $1", table.name());
        let id = match id {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

/// Tables held in memory. Used by tests and for running the dashboard
/// against a JSON fixture.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: Table, rows: Vec<Row>) -> Self {
        self.tables
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table, rows);
        self
    }

    /// Loads `{ "user_dishes": [...], "user_comments": [...], ... }`.
    pub fn from_fixture(path: &Path) -> Result<Self, DataSourceError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| DataSourceError::Fixture(format!("{}: {err}", path.display())))?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|err| DataSourceError::Fixture(format!("{}: {err}", path.display())))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DataSourceError> {
        let Value::Object(entries) = value else {
            return Err(DataSourceError::Fixture(
                "fixture must be an object of tables".to_string(),
            ));
        };

        let mut source = Self::new();
        for (name, rows) in entries {
            let table = Table::from_name(&name)
                .ok_or_else(|| DataSourceError::Fixture(format!("unknown table `{name}`")))?;
            let rows = serde_json::from_value::<Vec<Row>>(rows)
                .map_err(|err| DataSourceError::Fixture(format!("{name}: {err}")))?;
            source = source.with_table(table, rows);
        }
        Ok(source)
    }

    fn rows(&self, table: Table) -> Result<Vec<Row>, DataSourceError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| DataSourceError::Upstream("memory source poisoned".to_string()))?;
        Ok(tables.get(&table).cloned().unwrap_or_default())
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        // Postgres sorts nulls last when ascending.
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, DataSourceError> {
        let mut rows = self.rows(query.table)?;

        if let Some(order) = &query.order {
            quote_ident(&order.column)?;
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        if query.columns.is_empty() {
            return Ok(rows);
        }

        for column in &query.columns {
            quote_ident(column)?;
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                query
                    .columns
                    .iter()
                    .map(|column| {
                        let value = row.get(column).cloned().unwrap_or(Value::Null);
                        (column.clone(), value)
                    })
                    .collect()
            })
            .collect())
    }

    async fn count(&self, table: Table) -> Result<u64, DataSourceError> {
        Ok(self.rows(table)?.len() as u64)
    }

    async fn delete_by_id(&self, table: Table, id: &Value) -> Result<(), DataSourceError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| DataSourceError::Upstream("memory source poisoned".to_string()))?;
        if let Some(rows) = tables.get_mut(&table) {
            rows.retain(|row| row.get("id") != Some(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comments() -> MemorySource {
        MemorySource::from_value(json!({
            "user_comments": [
                {"id": 1, "user_name": "alice", "created_at": "2024-06-01T00:00:00Z"},
                {"id": 2, "user_name": "bob", "created_at": "2024-06-03T00:00:00Z"},
                {"id": 3, "user_name": null, "created_at": "2024-06-02T00:00:00Z"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn builds_row_to_json_sql() {
        let sql = Query::from(Table::UserComments)
            .select(&["id", "created_at"])
            .order("created_at", false)
            .limit(20)
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT row_to_json(t) FROM (SELECT \"id\", \"created_at\" FROM public.user_comments \
             ORDER BY \"created_at\" DESC LIMIT 20) t"
        );
    }

    #[test]
    fn rejects_suspicious_columns() {
        let result = Query::from(Table::Foods).select(&["name; drop table foods"]).to_sql();
        assert!(matches!(result, Err(DataSourceError::InvalidColumn(_))));
    }

    #[test]
    fn table_names_round_trip() {
        for table in Table::ALL {
            assert_eq!(Table::from_name(table.name()), Some(table));
        }
        assert_eq!(Table::from_name("users"), None);
    }

    #[tokio::test]
    async fn memory_select_orders_limits_and_projects() {
        let source = comments();
        let rows = source
            .select(
                &Query::from(Table::UserComments)
                    .select(&["id"])
                    .order("created_at", false)
                    .limit(2),
            )
            .await
            .unwrap();
        assert_eq!(
            rows.into_iter().map(Value::Object).collect::<Vec<_>>(),
            vec![json!({"id": 2}), json!({"id": 3})]
        );
    }

    #[tokio::test]
    async fn memory_count_and_delete() {
        let source = comments();
        assert_eq!(source.count(Table::UserComments).await.unwrap(), 3);
        assert_eq!(source.count(Table::Foods).await.unwrap(), 0);

        source.delete_by_id(Table::UserComments, &json!(2)).await.unwrap();
        assert_eq!(source.count(Table::UserComments).await.unwrap(), 2);
    }

    #[test]
    fn fixture_rejects_unknown_tables() {
        let result = MemorySource::from_value(json!({"users": []}));
        assert!(matches!(result, Err(DataSourceError::Fixture(_))));
    }
}
