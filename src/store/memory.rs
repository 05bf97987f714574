//! In-process store used by tests and by `--dsn memory://`.
//!
//! Transactions take an exclusive lock on the whole dataset for their lifetime
//! and work on a private copy of it; `commit` publishes the copy, anything else
//! (explicit rollback, drop, cancellation, panic) discards it. This is stricter
//! than the row locks the Postgres store relies on, so every ownership
//! invariant that holds there holds here too.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    Changes, Column, FOREIGN_KEYS, OnDelete, Predicate, Row, Store, StoreError, Table,
    Transaction, Value,
};

type Tables = BTreeMap<Table, Vec<Row>>;

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTransaction { guard, staged })
    }

    async fn fetch_one(
        &self,
        table: Table,
        predicate: &Predicate,
    ) -> Result<Option<Row>, StoreError> {
        predicate.check(table)?;
        let tables = self.tables.lock().await;
        Ok(rows(&tables, table)
            .iter()
            .find(|row| predicate.matches(row))
            .cloned())
    }

    async fn fetch_all(
        &self,
        table: Table,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Row>, StoreError> {
        if let Some(predicate) = predicate {
            predicate.check(table)?;
        }
        let tables = self.tables.lock().await;
        Ok(rows(&tables, table)
            .iter()
            .filter(|row| predicate.is_none_or(|p| p.matches(row)))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn select_one(
        &mut self,
        table: Table,
        predicate: &Predicate,
    ) -> Result<Option<Row>, StoreError> {
        predicate.check(table)?;
        Ok(rows(&self.staged, table)
            .iter()
            .find(|row| predicate.matches(row))
            .cloned())
    }

    async fn insert(&mut self, table: Table, values: &Changes) -> Result<Row, StoreError> {
        values.check(table)?;

        let mut row = Row::new(table, BTreeMap::new());
        for &column in table.columns() {
            row.set(column, default_value(column));
        }
        for (column, value) in values.assignments() {
            row.set(*column, value.clone());
        }

        check_unique(&self.staged, table, &row)?;
        check_references(&self.staged, table, &row)?;

        self.staged.entry(table).or_default().push(row.clone());
        Ok(row)
    }

    async fn update(
        &mut self,
        table: Table,
        predicate: &Predicate,
        changes: &Changes,
    ) -> Result<u64, StoreError> {
        predicate.check(table)?;
        changes.check(table)?;

        let current = rows(&self.staged, table);
        let mut updated = Vec::with_capacity(current.len());
        let mut affected = 0;
        for row in current {
            if predicate.matches(row) {
                let mut row = row.clone();
                for (column, value) in changes.assignments() {
                    row.set(*column, value.clone());
                }
                affected += 1;
                updated.push((true, row));
            } else {
                updated.push((false, row.clone()));
            }
        }

        for (index, (changed, row)) in updated.iter().enumerate() {
            if *changed {
                check_unique_among(table, row, index, updated.iter().map(|(_, r)| r))?;
                check_references(&self.staged, table, row)?;
            }
        }

        self.staged
            .insert(table, updated.into_iter().map(|(_, row)| row).collect());
        Ok(affected)
    }

    async fn delete(&mut self, table: Table, predicate: &Predicate) -> Result<u64, StoreError> {
        predicate.check(table)?;
        Ok(delete_where(&mut self.staged, table, &|row: &Row| predicate.matches(row)))
    }

    async fn commit(self) -> Result<(), StoreError> {
        let Self { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn rows(tables: &Tables, table: Table) -> &[Row] {
    tables.get(&table).map_or(&[], Vec::as_slice)
}

fn default_value(column: Column) -> Value {
    match column {
        Column::Id => Value::Uuid(Uuid::new_v4()),
        Column::ReadOnly => Value::Bool(false),
        _ => Value::Null,
    }
}

fn check_unique(tables: &Tables, table: Table, candidate: &Row) -> Result<(), StoreError> {
    for &column in table.unique_columns() {
        let Some(value) = candidate.get(column).filter(|v| **v != Value::Null) else {
            continue;
        };
        let clash = rows(tables, table)
            .iter()
            .any(|row| row.get(column) == Some(value));
        if clash {
            return Err(StoreError::UniqueViolation { table, column });
        }
    }
    Ok(())
}

fn check_unique_among<'a>(
    table: Table,
    candidate: &Row,
    position: usize,
    all: impl Iterator<Item = &'a Row>,
) -> Result<(), StoreError> {
    let all: Vec<&Row> = all.collect();
    for &column in table.unique_columns() {
        let Some(value) = candidate.get(column).filter(|v| **v != Value::Null) else {
            continue;
        };
        let clash = all
            .iter()
            .enumerate()
            .any(|(index, row)| index != position && row.get(column) == Some(value));
        if clash {
            return Err(StoreError::UniqueViolation { table, column });
        }
    }
    Ok(())
}

fn check_references(tables: &Tables, table: Table, row: &Row) -> Result<(), StoreError> {
    for fk in FOREIGN_KEYS.iter().filter(|fk| fk.table == table) {
        let Some(Value::Uuid(target)) = row.get(fk.column) else {
            continue;
        };
        let exists = rows(tables, fk.references)
            .iter()
            .any(|parent| parent.get(Column::Id) == Some(&Value::Uuid(*target)));
        if !exists {
            return Err(StoreError::ForeignKeyViolation {
                table,
                column: fk.column,
            });
        }
    }
    Ok(())
}

/// Remove matching rows and apply the referential actions declared in [`FOREIGN_KEYS`].
fn delete_where(tables: &mut Tables, table: Table, matches: &dyn Fn(&Row) -> bool) -> u64 {
    let Some(current) = tables.get_mut(&table) else {
        return 0;
    };

    let mut removed = Vec::new();
    current.retain(|row| {
        if matches(row) {
            if let Some(Value::Uuid(id)) = row.get(Column::Id) {
                removed.push(*id);
            }
            false
        } else {
            true
        }
    });

    let count = removed.len() as u64;
    if removed.is_empty() {
        return count;
    }

    for fk in FOREIGN_KEYS.iter().filter(|fk| fk.references == table) {
        let references_removed = |row: &Row| {
            matches!(row.get(fk.column), Some(Value::Uuid(id)) if removed.contains(id))
        };
        match fk.on_delete {
            OnDelete::Cascade => {
                delete_where(tables, fk.table, &references_removed);
            }
            OnDelete::SetNull => {
                if let Some(children) = tables.get_mut(&fk.table) {
                    for child in children.iter_mut().filter(|row| references_removed(row)) {
                        child.set(fk.column, Value::Null);
                    }
                }
            }
        }
    }

    count
}
