//! Ownership-checked mutations.
//!
//! [`mutate`] locks the target row (and, for indirectly owned rows, the
//! parent carrying the owner), compares the owner with the acting user and
//! only then applies the mutation, all inside one transaction. Any failure
//! rolls the transaction back; a dropped transaction rolls back on its own.

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::store::{
    Changes, Column, Predicate, Row, Store, StoreError, Table, Transaction, rollback_logged,
};

/// How the owner of a row is found.
#[derive(Clone, Copy, Debug)]
pub enum OwnerResolver {
    /// The row itself stores its owner.
    Direct { owner_column: Column },
    /// The row points at a parent row that stores the owner.
    Parent {
        parent_column: Column,
        parent_table: Table,
        owner_column: Column,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct OwnedResource {
    pub table: Table,
    pub resolver: OwnerResolver,
}

/// Forms are owned by the user in `forms.user_id`.
pub const FORM: OwnedResource = OwnedResource {
    table: Table::Forms,
    resolver: OwnerResolver::Direct {
        owner_column: Column::UserId,
    },
};

/// Schemas are owned by whoever owns their form.
pub const SCHEMA: OwnedResource = OwnedResource {
    table: Table::FormSchemas,
    resolver: OwnerResolver::Parent {
        parent_column: Column::FormId,
        parent_table: Table::Forms,
        owner_column: Column::UserId,
    },
};

#[derive(Clone, Debug)]
pub enum Mutation {
    Update(Changes),
    Delete,
    /// Insert a row into another table; guarded by ownership of the target.
    InsertChild { table: Table, values: Changes },
}

#[derive(Debug)]
pub enum Mutated {
    Rows(u64),
    Inserted(Row),
}

#[derive(Debug, Error)]
pub enum OwnershipError {
    #[error("resource not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Apply `mutation` to the row of `resource` matching `target` if `acting_user` owns it.
///
/// # Errors
/// - [`OwnershipError::NotFound`] if no row matches `target` (before or while mutating),
/// - [`OwnershipError::PermissionDenied`] if the owner is someone else or nobody,
/// - [`OwnershipError::Store`] for persistence failures, including a failed commit.
pub async fn mutate<S: Store>(
    store: &S,
    resource: OwnedResource,
    target: &Predicate,
    acting_user: Uuid,
    mutation: Mutation,
) -> Result<Mutated, OwnershipError> {
    let mut tx = store.begin().await?;
    match guarded(&mut tx, resource, target, acting_user, mutation).await {
        Ok(mutated) => {
            tx.commit().await?;
            Ok(mutated)
        }
        Err(err) => {
            rollback_logged(tx).await;
            Err(err)
        }
    }
}

async fn guarded<T: Transaction>(
    tx: &mut T,
    resource: OwnedResource,
    target: &Predicate,
    acting_user: Uuid,
    mutation: Mutation,
) -> Result<Mutated, OwnershipError> {
    let row = tx
        .select_one(resource.table, target)
        .await?
        .ok_or(OwnershipError::NotFound)?;

    let owner = match resource.resolver {
        OwnerResolver::Direct { owner_column } => row.opt_uuid(owner_column)?,
        OwnerResolver::Parent {
            parent_column,
            parent_table,
            owner_column,
        } => {
            let parent_id = row.uuid(parent_column)?;
            tx.select_one(parent_table, &Predicate::id(parent_id))
                .await?
                .ok_or(OwnershipError::NotFound)?
                .opt_uuid(owner_column)?
        }
    };

    if owner != Some(acting_user) {
        debug!(
            table = resource.table.name(),
            acting_user = %acting_user,
            "Ownership check failed"
        );
        return Err(OwnershipError::PermissionDenied);
    }

    let mutated = match mutation {
        Mutation::Update(changes) => {
            Mutated::Rows(tx.update(resource.table, target, &changes).await?)
        }
        Mutation::Delete => Mutated::Rows(tx.delete(resource.table, target).await?),
        Mutation::InsertChild { table, values } => {
            Mutated::Inserted(tx.insert(table, &values).await?)
        }
    };

    if matches!(mutated, Mutated::Rows(0)) {
        return Err(OwnershipError::NotFound);
    }
    Ok(mutated)
}
