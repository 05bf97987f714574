//! Persistence contract shared by the auth and resource services.
//!
//! Tables and columns form a closed set: every statement is built from the
//! [`Table`] and [`Column`] enums below, so no caller-supplied identifier ever
//! reaches SQL. Each table declares its columns, its unique columns and the
//! foreign keys pointing at it; both store implementations enforce the same
//! declarations.
//!
//! A [`Transaction`] that is dropped without [`Transaction::commit`] is rolled
//! back. Callers still roll back explicitly on error paths so the failure is
//! logged, but cancellation and panics rely on the drop behavior.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::{collections::BTreeMap, future::Future, time::Duration};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Users,
    Forms,
    FormSchemas,
}

impl Table {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Forms => "forms",
            Self::FormSchemas => "form_schemas",
        }
    }

    /// Columns in the order they are selected and returned.
    #[must_use]
    pub fn columns(self) -> &'static [Column] {
        match self {
            Self::Users => &[Column::Id, Column::Username, Column::Password],
            Self::Forms => &[Column::Id, Column::UserId, Column::Title],
            Self::FormSchemas => &[
                Column::Id,
                Column::FormId,
                Column::Title,
                Column::Version,
                Column::Schema,
                Column::ReadOnly,
            ],
        }
    }

    #[must_use]
    pub fn unique_columns(self) -> &'static [Column] {
        match self {
            Self::Users => &[Column::Id, Column::Username],
            Self::Forms | Self::FormSchemas => &[Column::Id],
        }
    }

    #[must_use]
    pub fn has_column(self, column: Column) -> bool {
        self.columns().contains(&column)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Id,
    Username,
    Password,
    UserId,
    FormId,
    Title,
    Version,
    Schema,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Uuid,
    Text,
    Json,
    Bool,
}

impl Column {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Username => "username",
            Self::Password => "password",
            Self::UserId => "user_id",
            Self::FormId => "form_id",
            Self::Title => "title",
            Self::Version => "version",
            Self::Schema => "schema",
            Self::ReadOnly => "read_only",
        }
    }

    #[must_use]
    pub fn kind(self) -> ColumnKind {
        match self {
            Self::Id | Self::UserId | Self::FormId => ColumnKind::Uuid,
            Self::Username | Self::Password | Self::Title | Self::Version => ColumnKind::Text,
            Self::Schema => ColumnKind::Json,
            Self::ReadOnly => ColumnKind::Bool,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnDelete {
    SetNull,
    Cascade,
}

#[derive(Clone, Copy, Debug)]
pub struct ForeignKey {
    pub table: Table,
    pub column: Column,
    pub references: Table,
    pub on_delete: OnDelete,
}

/// Referential actions, mirrored by `sql/schema.sql`.
pub const FOREIGN_KEYS: &[ForeignKey] = &[
    ForeignKey {
        table: Table::Forms,
        column: Column::UserId,
        references: Table::Users,
        on_delete: OnDelete::SetNull,
    },
    ForeignKey {
        table: Table::FormSchemas,
        column: Column::FormId,
        references: Table::Forms,
        on_delete: OnDelete::Cascade,
    },
];

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Uuid(Uuid),
    Text(String),
    Json(JsonValue),
    Bool(bool),
    Null,
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<Option<Uuid>> for Value {
    fn from(value: Option<Uuid>) -> Self {
        value.map_or(Self::Null, Self::Uuid)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Option<JsonValue>> for Value {
    fn from(value: Option<JsonValue>) -> Self {
        value.map_or(Self::Null, Self::Json)
    }
}

/// Conjunction of column equality conditions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<(Column, Value)>,
}

impl Predicate {
    #[must_use]
    pub fn id(id: Uuid) -> Self {
        Self::eq(Column::Id, id)
    }

    #[must_use]
    pub fn eq(column: Column, value: impl Into<Value>) -> Self {
        Self {
            conditions: vec![(column, value.into())],
        }
    }

    #[must_use]
    pub fn and(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.conditions.push((column, value.into()));
        self
    }

    #[must_use]
    pub fn conditions(&self) -> &[(Column, Value)] {
        &self.conditions
    }

    /// Returns `true` when every condition holds for `row`.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.values.get(column) == Some(value))
    }

    pub(crate) fn check(&self, table: Table) -> Result<(), StoreError> {
        check_columns(table, self.conditions.iter().map(|(column, _)| *column))
    }
}

/// Column assignments for inserts and updates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Changes {
    assignments: Vec<(Column, Value)>,
}

impl Changes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: Column, value: impl Into<Value>) {
        let value = value.into();
        if let Some(existing) = self.assignments.iter_mut().find(|(c, _)| *c == column) {
            existing.1 = value;
        } else {
            self.assignments.push((column, value));
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    #[must_use]
    pub fn assignments(&self) -> &[(Column, Value)] {
        &self.assignments
    }

    pub(crate) fn check(&self, table: Table) -> Result<(), StoreError> {
        check_columns(table, self.assignments.iter().map(|(column, _)| *column))
    }
}

fn check_columns(table: Table, columns: impl IntoIterator<Item = Column>) -> Result<(), StoreError> {
    for column in columns {
        if !table.has_column(column) {
            return Err(StoreError::UnknownColumn { table, column });
        }
    }
    Ok(())
}

/// A single record read from a table.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    table: Table,
    values: BTreeMap<Column, Value>,
}

impl Row {
    #[must_use]
    pub fn new(table: Table, values: BTreeMap<Column, Value>) -> Self {
        Self { table, values }
    }

    #[must_use]
    pub fn table(&self) -> Table {
        self.table
    }

    #[must_use]
    pub fn get(&self, column: Column) -> Option<&Value> {
        self.values.get(&column)
    }

    pub(crate) fn set(&mut self, column: Column, value: Value) {
        self.values.insert(column, value);
    }

    /// # Errors
    /// Returns [`StoreError::Decode`] if the column is missing, null, or not a UUID.
    pub fn uuid(&self, column: Column) -> Result<Uuid, StoreError> {
        self.opt_uuid(column)?
            .ok_or_else(|| self.decode_error(column, "uuid"))
    }

    /// # Errors
    /// Returns [`StoreError::Decode`] if the column holds a non-UUID value.
    pub fn opt_uuid(&self, column: Column) -> Result<Option<Uuid>, StoreError> {
        match self.values.get(&column) {
            Some(Value::Uuid(id)) => Ok(Some(*id)),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(self.decode_error(column, "uuid")),
        }
    }

    /// # Errors
    /// Returns [`StoreError::Decode`] if the column is missing or not text.
    pub fn text(&self, column: Column) -> Result<String, StoreError> {
        match self.values.get(&column) {
            Some(Value::Text(text)) => Ok(text.clone()),
            _ => Err(self.decode_error(column, "text")),
        }
    }

    /// # Errors
    /// Returns [`StoreError::Decode`] if the column is missing or not a boolean.
    pub fn boolean(&self, column: Column) -> Result<bool, StoreError> {
        match self.values.get(&column) {
            Some(Value::Bool(value)) => Ok(*value),
            _ => Err(self.decode_error(column, "bool")),
        }
    }

    /// # Errors
    /// Returns [`StoreError::Decode`] if the column holds a non-JSON value.
    pub fn json(&self, column: Column) -> Result<Option<JsonValue>, StoreError> {
        match self.values.get(&column) {
            Some(Value::Json(value)) => Ok(Some(value.clone())),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(self.decode_error(column, "json")),
        }
    }

    fn decode_error(&self, column: Column, expected: &'static str) -> StoreError {
        StoreError::Decode {
            table: self.table,
            column,
            expected,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate value for unique column {}.{}", .table.name(), .column.name())]
    UniqueViolation { table: Table, column: Column },
    #[error("{}.{} references a missing row", .table.name(), .column.name())]
    ForeignKeyViolation { table: Table, column: Column },
    #[error("column {} does not belong to table {}", .column.name(), .table.name())]
    UnknownColumn { table: Table, column: Column },
    #[error("column {}.{} is not a valid {expected}", .table.name(), .column.name())]
    Decode {
        table: Table,
        column: Column,
        expected: &'static str,
    },
    #[error("database operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Handle to the persistence layer, shared by every request.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: Transaction;

    /// Open a transaction; reads made through it lock the rows they return.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Read a single row outside of any transaction.
    async fn fetch_one(&self, table: Table, predicate: &Predicate)
    -> Result<Option<Row>, StoreError>;

    /// Read all matching rows outside of any transaction. `None` reads the whole table.
    async fn fetch_all(
        &self,
        table: Table,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Row>, StoreError>;

    /// Check that the backing database is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Transaction: Send {
    /// Read and lock one row. Returns `None` when nothing matches.
    async fn select_one(
        &mut self,
        table: Table,
        predicate: &Predicate,
    ) -> Result<Option<Row>, StoreError>;

    async fn insert(&mut self, table: Table, values: &Changes) -> Result<Row, StoreError>;

    /// Returns the number of rows affected.
    async fn update(
        &mut self,
        table: Table,
        predicate: &Predicate,
        changes: &Changes,
    ) -> Result<u64, StoreError>;

    /// Returns the number of rows deleted from `table`; referential actions are not counted.
    async fn delete(&mut self, table: Table, predicate: &Predicate) -> Result<u64, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Object-safe reachability check, for handlers that cannot name the store type.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: Store> Probe for S {
    async fn probe(&self) -> Result<(), StoreError> {
        self.ping().await
    }
}

/// Roll back and log instead of propagating, for use on paths that already carry an error.
pub async fn rollback_logged<T: Transaction>(tx: T) {
    if let Err(err) = tx.rollback().await {
        tracing::error!("Failed to roll back transaction: {err}");
    }
}

/// Run `operation` under `limit`. On expiry the future is dropped, which
/// rolls back any transaction it still holds.
///
/// # Errors
/// Returns the operation's own error, or [`StoreError::Timeout`] converted into `E`.
pub async fn with_timeout<T, E, F>(limit: Duration, operation: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_row(id: Uuid, owner: Option<Uuid>) -> Row {
        let mut values = BTreeMap::new();
        values.insert(Column::Id, Value::Uuid(id));
        values.insert(Column::UserId, Value::from(owner));
        values.insert(Column::Title, Value::from("title"));
        Row::new(Table::Forms, values)
    }

    #[test]
    fn predicate_matches_all_conditions() {
        let id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let row = form_row(id, Some(owner));

        assert!(Predicate::id(id).matches(&row));
        assert!(Predicate::id(id).and(Column::UserId, owner).matches(&row));
        assert!(
            !Predicate::id(id)
                .and(Column::UserId, Uuid::new_v4())
                .matches(&row)
        );
    }

    #[test]
    fn changes_reject_columns_of_other_tables() {
        let changes = Changes::new().set(Column::Password, "hash");
        let result = changes.check(Table::Forms);
        assert!(matches!(
            result,
            Err(StoreError::UnknownColumn {
                table: Table::Forms,
                column: Column::Password
            })
        ));
        assert!(changes.check(Table::Users).is_ok());
    }

    #[test]
    fn changes_overwrite_repeated_columns() {
        let changes = Changes::new()
            .set(Column::Title, "first")
            .set(Column::Title, "second");
        assert_eq!(
            changes.assignments(),
            &[(Column::Title, Value::from("second"))]
        );
    }

    #[test]
    fn row_decodes_nullable_owner() -> Result<(), StoreError> {
        let id = Uuid::new_v4();
        let row = form_row(id, None);
        assert_eq!(row.uuid(Column::Id)?, id);
        assert_eq!(row.opt_uuid(Column::UserId)?, None);
        assert!(matches!(
            row.uuid(Column::UserId),
            Err(StoreError::Decode { .. })
        ));
        assert!(matches!(
            row.boolean(Column::Title),
            Err(StoreError::Decode { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn timeout_drops_the_operation() {
        let result: Result<(), StoreError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[test]
    fn every_foreign_key_points_at_declared_columns() {
        for fk in FOREIGN_KEYS {
            assert!(fk.table.has_column(fk.column));
            assert!(fk.references.has_column(Column::Id));
        }
    }
}
