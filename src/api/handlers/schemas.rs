//! Schema endpoints, nested under their form.

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    api::{error::ErrorBody, session::Principal},
    resources::{NewSchema, ResourceApi, ResourceError, Schema, SchemaPatch},
};

#[utoipa::path(
    get,
    path = "/forms/{form_id}/schemas",
    params(("form_id" = Uuid, Path, description = "Form id")),
    responses(
        (status = 200, description = "Schemas of the form", body = [Schema]),
        (status = 404, description = "No such form", body = ErrorBody),
    ),
    tag = "schemas"
)]
pub async fn list_schemas(
    Path(form_id): Path<Uuid>,
    resources: Extension<Arc<dyn ResourceApi>>,
) -> Result<Json<Vec<Schema>>, ResourceError> {
    Ok(Json(resources.list_schemas(form_id).await?))
}

#[utoipa::path(
    get,
    path = "/forms/{form_id}/schemas/{schema_id}",
    params(
        ("form_id" = Uuid, Path, description = "Form id"),
        ("schema_id" = Uuid, Path, description = "Schema id"),
    ),
    responses(
        (status = 200, description = "The schema", body = Schema),
        (status = 404, description = "No such schema in this form", body = ErrorBody),
    ),
    tag = "schemas"
)]
pub async fn get_schema(
    Path((form_id, schema_id)): Path<(Uuid, Uuid)>,
    resources: Extension<Arc<dyn ResourceApi>>,
) -> Result<Json<Schema>, ResourceError> {
    Ok(Json(resources.get_schema(form_id, schema_id).await?))
}

#[utoipa::path(
    post,
    path = "/forms/{form_id}/schemas",
    params(("form_id" = Uuid, Path, description = "Form id")),
    request_body = NewSchema,
    responses(
        (status = 201, description = "Schema created", body = Schema),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "The caller does not own the form", body = ErrorBody),
        (status = 404, description = "No such form", body = ErrorBody),
        (status = 422, description = "Title or version out of bounds", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "schemas"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id, form_id = %form_id))]
pub async fn create_schema(
    principal: Principal,
    Path(form_id): Path<Uuid>,
    resources: Extension<Arc<dyn ResourceApi>>,
    Json(schema): Json<NewSchema>,
) -> Result<(StatusCode, Json<Schema>), ResourceError> {
    let schema = resources
        .create_schema(form_id, principal.user_id, schema)
        .await?;
    Ok((StatusCode::CREATED, Json(schema)))
}

#[utoipa::path(
    patch,
    path = "/forms/{form_id}/schemas/{schema_id}",
    params(
        ("form_id" = Uuid, Path, description = "Form id"),
        ("schema_id" = Uuid, Path, description = "Schema id"),
    ),
    request_body = SchemaPatch,
    responses(
        (status = 200, description = "Schema updated"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "The caller does not own the form", body = ErrorBody),
        (status = 404, description = "No such schema in this form", body = ErrorBody),
        (status = 422, description = "Empty patch or field out of bounds", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "schemas"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id, schema_id = %schema_id))]
pub async fn update_schema(
    principal: Principal,
    Path((form_id, schema_id)): Path<(Uuid, Uuid)>,
    resources: Extension<Arc<dyn ResourceApi>>,
    Json(patch): Json<SchemaPatch>,
) -> Result<StatusCode, ResourceError> {
    resources
        .update_schema(form_id, schema_id, principal.user_id, patch)
        .await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/forms/{form_id}/schemas/{schema_id}",
    params(
        ("form_id" = Uuid, Path, description = "Form id"),
        ("schema_id" = Uuid, Path, description = "Schema id"),
    ),
    responses(
        (status = 200, description = "Schema deleted"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "The caller does not own the form", body = ErrorBody),
        (status = 404, description = "No such schema in this form", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "schemas"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id, schema_id = %schema_id))]
pub async fn delete_schema(
    principal: Principal,
    Path((form_id, schema_id)): Path<(Uuid, Uuid)>,
    resources: Extension<Arc<dyn ResourceApi>>,
) -> Result<StatusCode, ResourceError> {
    resources
        .delete_schema(form_id, schema_id, principal.user_id)
        .await?;
    Ok(StatusCode::OK)
}
