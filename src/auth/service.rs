//! Account registration, login and session authentication.

use async_trait::async_trait;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    password::{CredentialError, CredentialHasher},
    token::TokenService,
};
use crate::store::{
    Changes, Column, DEFAULT_TIMEOUT, Predicate, Store, StoreError, Table, Transaction,
    rollback_logged, with_timeout,
};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;
const PASSWORD_MIN: usize = 8;
/// bcrypt only reads this many bytes of its input.
const PASSWORD_MAX_BYTES: usize = 72;
/// Verified against on unknown usernames so both login failures cost one bcrypt run.
const DUMMY_PASSWORD: &str = "webforms-unknown-user";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("username already taken")]
    UsernameTaken,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
}

/// Account operations used by the HTTP layer.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn register(&self, username: &str, password: &str) -> Result<Uuid, AuthError>;

    /// Returns a session token for valid credentials.
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthError>;

    /// Resolve a session token to the id of the user it was issued for.
    fn authenticate(&self, token: &str) -> Result<Uuid, AuthError>;

    async fn current_user(&self, user_id: Uuid) -> Result<User, AuthError>;

    async fn change_password(&self, user_id: Uuid, password: &str) -> Result<(), AuthError>;

    /// Forms owned by the account are kept and lose their owner.
    async fn delete_account(&self, user_id: Uuid) -> Result<(), AuthError>;
}

pub struct AuthService<S> {
    store: S,
    hasher: CredentialHasher,
    tokens: Arc<TokenService>,
    timeout: Duration,
    dummy_hash: OnceCell<String>,
}

impl<S: Store> AuthService<S> {
    #[must_use]
    pub fn new(store: S, hasher: CredentialHasher, tokens: Arc<TokenService>) -> Self {
        Self {
            store,
            hasher,
            tokens,
            timeout: DEFAULT_TIMEOUT,
            dummy_hash: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// bcrypt is CPU bound, keep it off the async workers.
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|err| AuthError::Internal(format!("hashing task failed: {err}")))?
            .map_err(|err| AuthError::Internal(err.to_string()))
    }

    async fn verify_password(&self, hash: String, password: &str) -> Result<(), AuthError> {
        let hasher = self.hasher;
        let password = password.to_string();
        let result = tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|err| AuthError::Internal(format!("verification task failed: {err}")))?;
        match result {
            Ok(()) => Ok(()),
            Err(CredentialError::Mismatch) => Err(AuthError::InvalidCredentials),
            Err(err) => Err(AuthError::Internal(err.to_string())),
        }
    }

    /// Spend the same bcrypt work as a real login; the outcome is ignored.
    async fn verify_dummy(&self, password: &str) {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.hash_password(DUMMY_PASSWORD))
            .await;
        match hash {
            Ok(hash) => {
                let _ = self.verify_password(hash.clone(), password).await;
            }
            Err(err) => debug!("Failed to hash dummy password: {err}"),
        }
    }
}

#[async_trait]
impl<S: Store> AuthApi for AuthService<S> {
    #[instrument(skip(self, password))]
    async fn register(&self, username: &str, password: &str) -> Result<Uuid, AuthError> {
        valid_username(username)?;
        valid_password(password)?;
        let hash = self.hash_password(password).await?;

        with_timeout(self.timeout, async {
            let mut tx = self.store.begin().await?;
            let values = Changes::new()
                .set(Column::Username, username)
                .set(Column::Password, hash);
            let row = match tx.insert(Table::Users, &values).await {
                Ok(row) => row,
                Err(StoreError::UniqueViolation {
                    column: Column::Username,
                    ..
                }) => {
                    rollback_logged(tx).await;
                    debug!("Username already taken");
                    return Err(AuthError::UsernameTaken);
                }
                Err(err) => {
                    rollback_logged(tx).await;
                    return Err(err.into());
                }
            };
            let id = row.uuid(Column::Id)?;
            tx.commit().await?;
            debug!(user_id = %id, "Registered user");
            Ok(id)
        })
        .await
    }

    #[instrument(skip(self, password))]
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        valid_username(username)?;
        valid_password(password)?;

        let row = with_timeout(
            self.timeout,
            self.store
                .fetch_one(Table::Users, &Predicate::eq(Column::Username, username)),
        )
        .await?;
        let Some(row) = row else {
            debug!("Login for unknown username");
            self.verify_dummy(password).await;
            return Err(AuthError::InvalidCredentials);
        };

        let user_id = row.uuid(Column::Id)?;
        if let Err(err) = self.verify_password(row.text(Column::Password)?, password).await {
            if matches!(err, AuthError::InvalidCredentials) {
                debug!(user_id = %user_id, "Login with wrong password");
            }
            return Err(err);
        }

        self.tokens
            .issue(user_id)
            .map_err(|err| AuthError::Internal(err.to_string()))
    }

    fn authenticate(&self, token: &str) -> Result<Uuid, AuthError> {
        self.tokens
            .verify(token)
            .map(|claims| claims.sub)
            .map_err(|err| {
                debug!("Rejected session token: {err}");
                AuthError::Unauthenticated
            })
    }

    #[instrument(skip(self))]
    async fn current_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        let row = with_timeout(
            self.timeout,
            self.store.fetch_one(Table::Users, &Predicate::id(user_id)),
        )
        .await?
        .ok_or(AuthError::NotFound)?;

        Ok(User {
            id: row.uuid(Column::Id)?,
            username: row.text(Column::Username)?,
        })
    }

    #[instrument(skip(self, password))]
    async fn change_password(&self, user_id: Uuid, password: &str) -> Result<(), AuthError> {
        valid_password(password)?;
        let hash = self.hash_password(password).await?;

        with_timeout(self.timeout, async {
            let mut tx = self.store.begin().await?;
            let changes = Changes::new().set(Column::Password, hash);
            let updated = match tx.update(Table::Users, &Predicate::id(user_id), &changes).await {
                Ok(updated) => updated,
                Err(err) => {
                    rollback_logged(tx).await;
                    return Err(err.into());
                }
            };
            if updated == 0 {
                rollback_logged(tx).await;
                return Err(AuthError::NotFound);
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, user_id: Uuid) -> Result<(), AuthError> {
        with_timeout(self.timeout, async {
            let mut tx = self.store.begin().await?;
            let deleted = match tx.delete(Table::Users, &Predicate::id(user_id)).await {
                Ok(deleted) => deleted,
                Err(err) => {
                    rollback_logged(tx).await;
                    return Err(err.into());
                }
            };
            if deleted == 0 {
                rollback_logged(tx).await;
                return Err(AuthError::NotFound);
            }
            tx.commit().await?;
            debug!("Deleted account");
            Ok(())
        })
        .await
    }
}

fn valid_username(username: &str) -> Result<(), AuthError> {
    let len = username.chars().count();
    if (USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        Ok(())
    } else {
        Err(AuthError::InvalidInput(
            "username must be between 3 and 32 characters",
        ))
    }
}

fn valid_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(AuthError::InvalidInput(
            "password must be at least 8 characters",
        ));
    }
    if password.len() > PASSWORD_MAX_BYTES {
        return Err(AuthError::InvalidInput(
            "password must not be longer than 72 bytes",
        ));
    }
    Ok(())
}
