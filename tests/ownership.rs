//! End-to-end ownership rules across the auth and resource services.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;
use webforms::{
    auth::{AuthApi, AuthError, AuthService, CredentialHasher, TokenOptions, TokenService},
    resources::{
        FormTitle, Mutation, NewSchema, OwnershipError, ResourceApi, ResourceError,
        ResourceService, SchemaPatch, mutate,
        ownership::{FORM, SCHEMA},
    },
    store::{
        Changes, Column, MemoryStore, PgStore, Predicate, Row, Store, StoreError, Table,
        Transaction, memory::MemoryTransaction,
    },
};

struct Harness<S> {
    auth: AuthService<S>,
    resources: ResourceService<S>,
}

fn harness<S: Store + Clone>(store: S) -> Result<Harness<S>> {
    let hasher = CredentialHasher::new(4)?;
    let tokens = Arc::new(TokenService::new(TokenOptions::new())?);
    Ok(Harness {
        auth: AuthService::new(store.clone(), hasher, tokens),
        resources: ResourceService::new(store),
    })
}

/// Register and log in, returning the id recovered from the token.
async fn sign_up(auth: &dyn AuthApi, username: &str) -> Result<Uuid> {
    let id = auth.register(username, "correct horse").await?;
    let token = auth.login(username, "correct horse").await?;
    assert_eq!(auth.authenticate(&token)?, id);
    Ok(id)
}

fn title(title: &str) -> FormTitle {
    FormTitle {
        title: title.to_string(),
    }
}

fn new_schema() -> NewSchema {
    NewSchema {
        title: "contact".to_string(),
        version: "1".to_string(),
        schema: Some(json!({"type": "object"})),
        read_only: false,
    }
}

#[tokio::test]
async fn only_the_owner_changes_a_form_and_its_schemas() -> Result<()> {
    let h = harness(MemoryStore::new())?;
    let alice = sign_up(&h.auth, "alice").await?;
    let bob = sign_up(&h.auth, "bob").await?;

    let form = h.resources.create_form(alice, title("survey")).await?;
    assert_eq!(form.user_id, Some(alice));
    let schema = h.resources.create_schema(form.id, alice, new_schema()).await?;

    let result = h.resources.update_form(form.id, bob, title("hijacked")).await;
    assert!(matches!(result, Err(ResourceError::PermissionDenied)));
    let result = h.resources.delete_form(form.id, bob).await;
    assert!(matches!(result, Err(ResourceError::PermissionDenied)));
    let result = h.resources.create_schema(form.id, bob, new_schema()).await;
    assert!(matches!(result, Err(ResourceError::PermissionDenied)));

    let patch = SchemaPatch {
        version: Some("2".to_string()),
        ..SchemaPatch::default()
    };
    let result = h
        .resources
        .update_schema(form.id, schema.id, bob, patch.clone())
        .await;
    assert!(matches!(result, Err(ResourceError::PermissionDenied)));
    let result = h.resources.delete_schema(form.id, schema.id, bob).await;
    assert!(matches!(result, Err(ResourceError::PermissionDenied)));

    assert_eq!(h.resources.get_form(form.id).await?.title, "survey");
    assert_eq!(h.resources.get_schema(form.id, schema.id).await?.version, "1");

    h.resources
        .update_schema(form.id, schema.id, alice, patch)
        .await?;
    assert_eq!(h.resources.get_schema(form.id, schema.id).await?.version, "2");

    h.resources.update_form(form.id, alice, title("renamed")).await?;
    assert_eq!(h.resources.get_form(form.id).await?.title, "renamed");
    assert_eq!(h.resources.list_forms_of_user(alice).await?.len(), 1);
    assert!(h.resources.list_forms_of_user(bob).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn schemas_are_addressed_through_their_form() -> Result<()> {
    let h = harness(MemoryStore::new())?;
    let alice = sign_up(&h.auth, "alice").await?;

    let first = h.resources.create_form(alice, title("first")).await?;
    let second = h.resources.create_form(alice, title("second")).await?;
    let schema = h.resources.create_schema(first.id, alice, new_schema()).await?;

    let result = h.resources.get_schema(second.id, schema.id).await;
    assert!(matches!(result, Err(ResourceError::NotFound)));
    let result = h.resources.delete_schema(second.id, schema.id, alice).await;
    assert!(matches!(result, Err(ResourceError::NotFound)));
    assert_eq!(h.resources.list_schemas(first.id).await?.len(), 1);
    assert!(h.resources.list_schemas(second.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn deleted_owner_leaves_an_orphaned_form() -> Result<()> {
    let h = harness(MemoryStore::new())?;
    let alice = sign_up(&h.auth, "alice").await?;
    let bob = sign_up(&h.auth, "bob").await?;
    let form = h.resources.create_form(alice, title("survey")).await?;

    h.auth.delete_account(alice).await?;

    let orphan = h.resources.get_form(form.id).await?;
    assert_eq!(orphan.user_id, None);
    for user in [alice, bob] {
        let result = h.resources.update_form(form.id, user, title("mine")).await;
        assert!(matches!(result, Err(ResourceError::PermissionDenied)));
    }

    let result = h.auth.login("alice", "correct horse").await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));

    // The username is free again.
    sign_up(&h.auth, "alice").await?;
    Ok(())
}

#[tokio::test]
async fn deleting_a_form_deletes_its_schemas() -> Result<()> {
    let h = harness(MemoryStore::new())?;
    let alice = sign_up(&h.auth, "alice").await?;
    let form = h.resources.create_form(alice, title("survey")).await?;
    let schema = h.resources.create_schema(form.id, alice, new_schema()).await?;

    h.resources.delete_form(form.id, alice).await?;

    assert!(matches!(
        h.resources.get_form(form.id).await,
        Err(ResourceError::NotFound)
    ));
    assert!(matches!(
        h.resources.get_schema(form.id, schema.id).await,
        Err(ResourceError::NotFound)
    ));
    assert!(matches!(
        h.resources.list_schemas(form.id).await,
        Err(ResourceError::NotFound)
    ));
    Ok(())
}

#[tokio::test]
async fn concurrent_owner_writes_are_serialized() -> Result<()> {
    let store = MemoryStore::new();
    let h = Arc::new(harness(store)?);
    let alice = sign_up(&h.auth, "alice").await?;
    let form = h.resources.create_form(alice, title("v0")).await?;

    let mut tasks = Vec::new();
    for n in 1..=8 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.resources
                .update_form(form.id, alice, title(&format!("v{n}")))
                .await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let current = h.resources.get_form(form.id).await?.title;
    assert!(current.starts_with('v') && current != "v0");
    Ok(())
}

/// Store whose transactions lose the target row between the ownership
/// check and the write, as a concurrent delete would.
#[derive(Clone, Default)]
struct Vanishing {
    inner: MemoryStore,
}

struct VanishingTx {
    inner: MemoryTransaction,
}

#[async_trait]
impl Store for Vanishing {
    type Tx = VanishingTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(VanishingTx {
            inner: self.inner.begin().await?,
        })
    }

    async fn fetch_one(
        &self,
        table: Table,
        predicate: &Predicate,
    ) -> Result<Option<Row>, StoreError> {
        self.inner.fetch_one(table, predicate).await
    }

    async fn fetch_all(
        &self,
        table: Table,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Row>, StoreError> {
        self.inner.fetch_all(table, predicate).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

#[async_trait]
impl Transaction for VanishingTx {
    async fn select_one(
        &mut self,
        table: Table,
        predicate: &Predicate,
    ) -> Result<Option<Row>, StoreError> {
        self.inner.select_one(table, predicate).await
    }

    async fn insert(&mut self, table: Table, values: &Changes) -> Result<Row, StoreError> {
        self.inner.insert(table, values).await
    }

    async fn update(
        &mut self,
        table: Table,
        predicate: &Predicate,
        changes: &Changes,
    ) -> Result<u64, StoreError> {
        self.inner.delete(table, predicate).await?;
        self.inner.update(table, predicate, changes).await
    }

    async fn delete(&mut self, table: Table, predicate: &Predicate) -> Result<u64, StoreError> {
        self.inner.delete(table, predicate).await?;
        self.inner.delete(table, predicate).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn row_vanishing_before_the_write_is_not_found() -> Result<()> {
    let store = Vanishing::default();
    let h = harness(store.clone())?;
    let alice = sign_up(&h.auth, "alice").await?;
    let form = h.resources.create_form(alice, title("survey")).await?;
    let schema = h.resources.create_schema(form.id, alice, new_schema()).await?;

    let rename = Mutation::Update(Changes::new().set(Column::Title, "renamed"));
    let result = mutate(&store, FORM, &Predicate::id(form.id), alice, rename).await;
    assert!(matches!(result, Err(OwnershipError::NotFound)));

    let target = Predicate::id(schema.id).and(Column::FormId, form.id);
    let result = mutate(&store, SCHEMA, &target, alice, Mutation::Delete).await;
    assert!(matches!(result, Err(OwnershipError::NotFound)));

    let result = h.resources.delete_form(form.id, alice).await;
    assert!(matches!(result, Err(ResourceError::NotFound)));

    // Every attempt rolled back: the rows are intact.
    assert_eq!(h.resources.get_form(form.id).await?.title, "survey");
    assert_eq!(h.resources.get_schema(form.id, schema.id).await?.id, schema.id);
    Ok(())
}

/// A store that never answers, to exercise the operation timeout.
#[derive(Clone, Default)]
struct Stalled;

#[async_trait]
impl Store for Stalled {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        std::future::pending().await
    }

    async fn fetch_one(&self, _: Table, _: &Predicate) -> Result<Option<Row>, StoreError> {
        std::future::pending().await
    }

    async fn fetch_all(&self, _: Table, _: Option<&Predicate>) -> Result<Vec<Row>, StoreError> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn stalled_database_times_out() {
    let resources = ResourceService::new(Stalled).with_timeout(Duration::from_millis(20));
    let result = resources
        .update_form(Uuid::new_v4(), Uuid::new_v4(), title("late"))
        .await;
    assert!(matches!(
        result,
        Err(ResourceError::Store(StoreError::Timeout(_)))
    ));
    let result = resources.list_forms().await;
    assert!(matches!(
        result,
        Err(ResourceError::Store(StoreError::Timeout(_)))
    ));
}

/// Runs against a real database when `WEBFORMS_TEST_DSN` is set and
/// `sql/schema.sql` has been applied to it.
#[tokio::test]
async fn postgres_ownership_round_trip() -> Result<()> {
    let Ok(dsn) = std::env::var("WEBFORMS_TEST_DSN") else {
        eprintln!("skipping postgres_ownership_round_trip: WEBFORMS_TEST_DSN is not set");
        return Ok(());
    };
    let store = PgStore::connect(&dsn, Duration::from_secs(5)).await?;
    store.ping().await?;
    let h = harness(store)?;

    let suffix = Uuid::new_v4().simple().to_string();
    let alice_name = format!("alice-{}", &suffix[..8]);
    let bob_name = format!("bob-{}", &suffix[..8]);
    let alice = sign_up(&h.auth, &alice_name).await?;
    let bob = sign_up(&h.auth, &bob_name).await?;

    let result = h.auth.register(&alice_name, "another password").await;
    assert!(matches!(result, Err(AuthError::UsernameTaken)));

    let form = h.resources.create_form(alice, title("survey")).await?;
    let schema = h.resources.create_schema(form.id, alice, new_schema()).await?;
    let stored = h.resources.get_schema(form.id, schema.id).await?;
    assert_eq!(stored.schema, Some(json!({"type": "object"})));

    let result = h.resources.update_form(form.id, bob, title("hijacked")).await;
    assert!(matches!(result, Err(ResourceError::PermissionDenied)));
    assert_eq!(h.resources.get_form(form.id).await?.title, "survey");

    h.auth.delete_account(alice).await?;
    let orphan = h.resources.get_form(form.id).await?;
    assert_eq!(orphan.user_id, None);

    let result = h.resources.delete_form(form.id, alice).await;
    assert!(matches!(result, Err(ResourceError::PermissionDenied)));

    let user = h.auth.current_user(bob).await?;
    assert_eq!(user.username, bob_name);
    h.auth.delete_account(bob).await.context("cleanup")?;
    Ok(())
}
