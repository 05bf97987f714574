//! Account endpoints under `/users`.

use axum::{Json, extract::Extension, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    api::{error::ErrorBody, session::Principal},
    auth::{AuthApi, AuthError, User},
};

#[derive(ToSchema, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    username: String,
    password: String,
}

#[derive(ToSchema, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordChange {
    password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Registered {
    pub id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Session {
    pub token: String,
}

#[utoipa::path(
    post,
    path = "/users/register",
    request_body = Credentials,
    responses(
        (status = 201, description = "Account created", body = Registered),
        (status = 409, description = "Username already taken", body = ErrorBody),
        (status = 422, description = "Username or password out of bounds", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn register(
    auth: Extension<Arc<dyn AuthApi>>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<Registered>), AuthError> {
    let id = auth
        .register(&credentials.username, &credentials.password)
        .await?;
    Ok((StatusCode::CREATED, Json(Registered { id })))
}

#[utoipa::path(
    post,
    path = "/users/login",
    request_body = Credentials,
    responses(
        (status = 200, description = "Session token", body = Session),
        (status = 401, description = "Invalid username or password", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn login(
    auth: Extension<Arc<dyn AuthApi>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<Session>, AuthError> {
    let token = auth
        .login(&credentials.username, &credentials.password)
        .await?;
    Ok(Json(Session { token }))
}

#[utoipa::path(
    get,
    path = "/users/login",
    responses(
        (status = 200, description = "Authenticated user", body = User),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "The account was deleted", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn current_user(
    principal: Principal,
    auth: Extension<Arc<dyn AuthApi>>,
) -> Result<Json<User>, AuthError> {
    Ok(Json(auth.current_user(principal.user_id).await?))
}

#[utoipa::path(
    patch,
    path = "/users",
    request_body = PasswordChange,
    responses(
        (status = 200, description = "Password changed"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "The account was deleted", body = ErrorBody),
        (status = 422, description = "Password out of bounds", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn change_password(
    principal: Principal,
    auth: Extension<Arc<dyn AuthApi>>,
    Json(change): Json<PasswordChange>,
) -> Result<StatusCode, AuthError> {
    auth.change_password(principal.user_id, &change.password)
        .await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/users",
    responses(
        (status = 200, description = "Account deleted; owned forms are kept without owner"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "The account was already deleted", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn delete_account(
    principal: Principal,
    auth: Extension<Arc<dyn AuthApi>>,
) -> Result<StatusCode, AuthError> {
    auth.delete_account(principal.user_id).await?;
    Ok(StatusCode::OK)
}
