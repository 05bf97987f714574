//! Postgres-backed store.
//!
//! Statements are assembled from the closed [`Table`]/[`Column`] set and every
//! value is bound as a parameter. Reads inside a transaction use
//! `SELECT ... FOR UPDATE` so the ownership check and the write that follows
//! it cannot interleave with another writer on the same row.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{
    Connection, PgPool, Postgres, Row as _,
    postgres::{PgArguments, PgPoolOptions, PgRow},
    query::Query,
};
use std::{collections::BTreeMap, time::Duration};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{
    Changes, Column, ColumnKind, FOREIGN_KEYS, Predicate, Row, Store, StoreError, Table,
    Transaction, Value,
};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized like the rest of our services.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached within `acquire_timeout`.
    pub async fn connect(dsn: &str, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .acquire_timeout(acquire_timeout)
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let span = info_span!("db.begin", db.system = "postgresql");
        let tx = self.pool.begin().instrument(span).await?;
        Ok(PgTransaction { tx })
    }

    async fn fetch_one(
        &self,
        table: Table,
        predicate: &Predicate,
    ) -> Result<Option<Row>, StoreError> {
        predicate.check(table)?;
        let sql = select_sql(table, Some(predicate), false);
        let row = bind_predicate(sqlx::query(&sql), predicate)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_row(table, &row)).transpose()
    }

    async fn fetch_all(
        &self,
        table: Table,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Row>, StoreError> {
        if let Some(predicate) = predicate {
            predicate.check(table)?;
        }
        let sql = select_sql(table, predicate, false);
        let mut query = sqlx::query(&sql);
        if let Some(predicate) = predicate {
            query = bind_predicate(query, predicate);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_row(table, row)).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await?;
            Ok(())
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn select_one(
        &mut self,
        table: Table,
        predicate: &Predicate,
    ) -> Result<Option<Row>, StoreError> {
        predicate.check(table)?;
        let sql = select_sql(table, Some(predicate), true);
        let row = bind_predicate(sqlx::query(&sql), predicate)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|err| map_error(table, err))?;
        row.map(|row| decode_row(table, &row)).transpose()
    }

    async fn insert(&mut self, table: Table, values: &Changes) -> Result<Row, StoreError> {
        values.check(table)?;
        let columns: Vec<&str> = values
            .assignments()
            .iter()
            .map(|(column, _)| column.name())
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table.name(),
            quote_all(&columns),
            placeholders.join(", "),
            column_list(table),
        );

        let mut query = sqlx::query(&sql);
        for (column, value) in values.assignments() {
            query = bind_value(query, *column, value);
        }
        let row = query
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| map_error(table, err))?;
        decode_row(table, &row)
    }

    async fn update(
        &mut self,
        table: Table,
        predicate: &Predicate,
        changes: &Changes,
    ) -> Result<u64, StoreError> {
        predicate.check(table)?;
        changes.check(table)?;
        if changes.is_empty() {
            return Ok(0);
        }

        let sets: Vec<String> = changes
            .assignments()
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("\"{}\" = ${}", column.name(), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {}{}",
            table.name(),
            sets.join(", "),
            where_clause(predicate, changes.assignments().len()),
        );

        let mut query = sqlx::query(&sql);
        for (column, value) in changes.assignments() {
            query = bind_value(query, *column, value);
        }
        let result = bind_predicate(query, predicate)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| map_error(table, err))?;
        Ok(result.rows_affected())
    }

    async fn delete(&mut self, table: Table, predicate: &Predicate) -> Result<u64, StoreError> {
        predicate.check(table)?;
        let sql = format!("DELETE FROM {}{}", table.name(), where_clause(predicate, 0));
        let result = bind_predicate(sqlx::query(&sql), predicate)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| map_error(table, err))?;
        Ok(result.rows_affected())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn quote_all(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_list(table: Table) -> String {
    let names: Vec<&str> = table.columns().iter().map(|column| column.name()).collect();
    quote_all(&names)
}

/// Build ` WHERE ...` with placeholders numbered after `offset` bound parameters.
/// Null conditions become `IS NULL` and consume no placeholder.
fn where_clause(predicate: &Predicate, offset: usize) -> String {
    let mut index = offset;
    let conditions: Vec<String> = predicate
        .conditions()
        .iter()
        .map(|(column, value)| {
            if *value == Value::Null {
                format!("\"{}\" IS NULL", column.name())
            } else {
                index += 1;
                format!("\"{}\" = ${index}", column.name())
            }
        })
        .collect();
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn select_sql(table: Table, predicate: Option<&Predicate>, for_update: bool) -> String {
    let mut sql = format!("SELECT {} FROM {}", column_list(table), table.name());
    if let Some(predicate) = predicate {
        sql.push_str(&where_clause(predicate, 0));
    }
    if for_update {
        sql.push_str(" FOR UPDATE");
    }
    sql
}

fn bind_predicate<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    predicate: &Predicate,
) -> Query<'q, Postgres, PgArguments> {
    for (column, value) in predicate.conditions() {
        if *value != Value::Null {
            query = bind_value(query, *column, value);
        }
    }
    query
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    column: Column,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Uuid(id) => query.bind(*id),
        Value::Text(text) => query.bind(text.clone()),
        Value::Json(json) => query.bind(json.clone()),
        Value::Bool(flag) => query.bind(*flag),
        Value::Null => match column.kind() {
            ColumnKind::Uuid => query.bind(None::<Uuid>),
            ColumnKind::Text => query.bind(None::<String>),
            ColumnKind::Json => query.bind(None::<JsonValue>),
            ColumnKind::Bool => query.bind(None::<bool>),
        },
    }
}

fn decode_row(table: Table, row: &PgRow) -> Result<Row, StoreError> {
    let mut values = BTreeMap::new();
    for &column in table.columns() {
        let name = column.name();
        let value = match column.kind() {
            ColumnKind::Uuid => row
                .try_get::<Option<Uuid>, _>(name)?
                .map_or(Value::Null, Value::Uuid),
            ColumnKind::Text => row
                .try_get::<Option<String>, _>(name)?
                .map_or(Value::Null, Value::Text),
            ColumnKind::Json => row
                .try_get::<Option<JsonValue>, _>(name)?
                .map_or(Value::Null, Value::Json),
            ColumnKind::Bool => row
                .try_get::<Option<bool>, _>(name)?
                .map_or(Value::Null, Value::Bool),
        };
        values.insert(column, value);
    }
    Ok(Row::new(table, values))
}

/// Translate constraint violations into typed errors; everything else stays a database error.
fn map_error(table: Table, err: sqlx::Error) -> StoreError {
    let sqlx::Error::Database(db_err) = &err else {
        return StoreError::Database(err);
    };
    let constraint = db_err.constraint().unwrap_or_default();
    match db_err.code().as_deref() {
        Some(UNIQUE_VIOLATION) => {
            let column = table
                .unique_columns()
                .iter()
                .copied()
                .find(|column| constraint.contains(column.name()))
                .unwrap_or(Column::Id);
            StoreError::UniqueViolation { table, column }
        }
        Some(FOREIGN_KEY_VIOLATION) => {
            let column = FOREIGN_KEYS
                .iter()
                .filter(|fk| fk.table == table)
                .map(|fk| fk.column)
                .find(|column| constraint.contains(column.name()))
                .unwrap_or(Column::Id);
            StoreError::ForeignKeyViolation { table, column }
        }
        _ => StoreError::Database(err),
    }
}
