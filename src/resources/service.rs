//! Forms and their schemas.
//!
//! Reads are public. Every write goes through [`ownership::mutate`], except
//! form creation which only needs an authenticated caller.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    ownership::{self, FORM, Mutated, Mutation, OwnershipError, SCHEMA},
    types::{Form, FormTitle, NewSchema, Schema, SchemaPatch},
};
use crate::store::{
    Column, DEFAULT_TIMEOUT, Predicate, Store, StoreError, Table, Transaction, rollback_logged,
    with_timeout,
};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("resource not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(&'static str),
}

impl From<OwnershipError> for ResourceError {
    fn from(err: OwnershipError) -> Self {
        match err {
            OwnershipError::NotFound => Self::NotFound,
            OwnershipError::PermissionDenied => Self::PermissionDenied,
            OwnershipError::Store(err) => Self::Store(err),
        }
    }
}

#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn list_forms(&self) -> Result<Vec<Form>, ResourceError>;

    async fn list_forms_of_user(&self, user_id: Uuid) -> Result<Vec<Form>, ResourceError>;

    async fn get_form(&self, form_id: Uuid) -> Result<Form, ResourceError>;

    async fn create_form(&self, user_id: Uuid, form: FormTitle) -> Result<Form, ResourceError>;

    async fn update_form(
        &self,
        form_id: Uuid,
        user_id: Uuid,
        patch: FormTitle,
    ) -> Result<(), ResourceError>;

    async fn delete_form(&self, form_id: Uuid, user_id: Uuid) -> Result<(), ResourceError>;

    /// Fails with `NotFound` when the form does not exist.
    async fn list_schemas(&self, form_id: Uuid) -> Result<Vec<Schema>, ResourceError>;

    async fn get_schema(&self, form_id: Uuid, schema_id: Uuid) -> Result<Schema, ResourceError>;

    async fn create_schema(
        &self,
        form_id: Uuid,
        user_id: Uuid,
        schema: NewSchema,
    ) -> Result<Schema, ResourceError>;

    async fn update_schema(
        &self,
        form_id: Uuid,
        schema_id: Uuid,
        user_id: Uuid,
        patch: SchemaPatch,
    ) -> Result<(), ResourceError>;

    async fn delete_schema(
        &self,
        form_id: Uuid,
        schema_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ResourceError>;
}

pub struct ResourceService<S> {
    store: S,
    timeout: Duration,
}

impl<S: Store> ResourceService<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn guarded(
        &self,
        resource: ownership::OwnedResource,
        target: Predicate,
        user_id: Uuid,
        mutation: Mutation,
    ) -> Result<Mutated, ResourceError> {
        with_timeout(self.timeout, async {
            ownership::mutate(&self.store, resource, &target, user_id, mutation)
                .await
                .map_err(ResourceError::from)
        })
        .await
    }

    async fn forms(&self, predicate: Option<Predicate>) -> Result<Vec<Form>, ResourceError> {
        let rows = with_timeout(
            self.timeout,
            self.store.fetch_all(Table::Forms, predicate.as_ref()),
        )
        .await?;
        Ok(rows
            .iter()
            .map(Form::try_from)
            .collect::<Result<_, _>>()?)
    }
}

fn schema_target(form_id: Uuid, schema_id: Uuid) -> Predicate {
    Predicate::id(schema_id).and(Column::FormId, form_id)
}

#[async_trait]
impl<S: Store> ResourceApi for ResourceService<S> {
    async fn list_forms(&self) -> Result<Vec<Form>, ResourceError> {
        self.forms(None).await
    }

    async fn list_forms_of_user(&self, user_id: Uuid) -> Result<Vec<Form>, ResourceError> {
        self.forms(Some(Predicate::eq(Column::UserId, user_id)))
            .await
    }

    async fn get_form(&self, form_id: Uuid) -> Result<Form, ResourceError> {
        let row = with_timeout(
            self.timeout,
            self.store.fetch_one(Table::Forms, &Predicate::id(form_id)),
        )
        .await?
        .ok_or(ResourceError::NotFound)?;
        Ok(Form::try_from(&row)?)
    }

    #[instrument(skip(self, form))]
    async fn create_form(&self, user_id: Uuid, form: FormTitle) -> Result<Form, ResourceError> {
        let values = form.changes()?.set(Column::UserId, user_id);
        with_timeout(self.timeout, async {
            let mut tx = self.store.begin().await?;
            let row = match tx.insert(Table::Forms, &values).await {
                Ok(row) => row,
                // The token outlived the account.
                Err(StoreError::ForeignKeyViolation { .. }) => {
                    rollback_logged(tx).await;
                    return Err(ResourceError::NotFound);
                }
                Err(err) => {
                    rollback_logged(tx).await;
                    return Err(err.into());
                }
            };
            tx.commit().await?;
            let form = Form::try_from(&row)?;
            debug!(form_id = %form.id, "Created form");
            Ok(form)
        })
        .await
    }

    #[instrument(skip(self, patch))]
    async fn update_form(
        &self,
        form_id: Uuid,
        user_id: Uuid,
        patch: FormTitle,
    ) -> Result<(), ResourceError> {
        let changes = patch.changes()?;
        self.guarded(FORM, Predicate::id(form_id), user_id, Mutation::Update(changes))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_form(&self, form_id: Uuid, user_id: Uuid) -> Result<(), ResourceError> {
        self.guarded(FORM, Predicate::id(form_id), user_id, Mutation::Delete)
            .await?;
        Ok(())
    }

    async fn list_schemas(&self, form_id: Uuid) -> Result<Vec<Schema>, ResourceError> {
        self.get_form(form_id).await?;
        let predicate = Predicate::eq(Column::FormId, form_id);
        let rows = with_timeout(
            self.timeout,
            self.store.fetch_all(Table::FormSchemas, Some(&predicate)),
        )
        .await?;
        Ok(rows
            .iter()
            .map(Schema::try_from)
            .collect::<Result<_, _>>()?)
    }

    async fn get_schema(&self, form_id: Uuid, schema_id: Uuid) -> Result<Schema, ResourceError> {
        let row = with_timeout(
            self.timeout,
            self.store
                .fetch_one(Table::FormSchemas, &schema_target(form_id, schema_id)),
        )
        .await?
        .ok_or(ResourceError::NotFound)?;
        Ok(Schema::try_from(&row)?)
    }

    #[instrument(skip(self, schema))]
    async fn create_schema(
        &self,
        form_id: Uuid,
        user_id: Uuid,
        schema: NewSchema,
    ) -> Result<Schema, ResourceError> {
        let values = schema.values(form_id)?;
        let mutation = Mutation::InsertChild {
            table: Table::FormSchemas,
            values,
        };
        match self
            .guarded(FORM, Predicate::id(form_id), user_id, mutation)
            .await?
        {
            Mutated::Inserted(row) => Ok(Schema::try_from(&row)?),
            Mutated::Rows(_) => Err(ResourceError::Internal("insert did not return a row")),
        }
    }

    #[instrument(skip(self, patch))]
    async fn update_schema(
        &self,
        form_id: Uuid,
        schema_id: Uuid,
        user_id: Uuid,
        patch: SchemaPatch,
    ) -> Result<(), ResourceError> {
        let changes = patch.changes()?;
        self.guarded(
            SCHEMA,
            schema_target(form_id, schema_id),
            user_id,
            Mutation::Update(changes),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_schema(
        &self,
        form_id: Uuid,
        schema_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ResourceError> {
        self.guarded(
            SCHEMA,
            schema_target(form_id, schema_id),
            user_id,
            Mutation::Delete,
        )
        .await?;
        Ok(())
    }
}
