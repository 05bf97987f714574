//! Form endpoints. Listing and reading are public; writes need a session and
//! ownership of the form.

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
    resources::{Form, FormTitle, ResourceApi, ResourceError},
};

#[utoipa::path(
    get,
    path = "/forms",
    responses((status = 200, description = "All forms", body = [Form])),
    tag = "forms"
)]
pub async fn list_forms(
    resources: Extension<Arc<dyn ResourceApi>>,
) -> Result<Json<Vec<Form>>, ResourceError> {
    Ok(Json(resources.list_forms().await?))
}

#[utoipa::path(
    get,
    path = "/forms/my-forms",
    responses(
        (status = 200, description = "Forms owned by the caller", body = [Form]),
        (status = 401, description = "Missing or invalid token"),
    ),
    security(("bearer" = [])),
    tag = "forms"
)]
pub async fn my_forms(
    principal: Principal,
    resources: Extension<Arc<dyn ResourceApi>>,
) -> Result<Json<Vec<Form>>, ResourceError> {
    Ok(Json(resources.list_forms_of_user(principal.user_id).await?))
}

#[utoipa::path(
    get,
    path = "/forms/{form_id}",
    params(("form_id" = Uuid, Path, description = "Form id")),
    responses(
        (status = 200, description = "The form", body = Form),
        (status = 404, description = "No such form", body = ErrorBody),
    ),
    tag = "forms"
)]
pub async fn get_form(
    Path(form_id): Path<Uuid>,
    resources: Extension<Arc<dyn ResourceApi>>,
) -> Result<Json<Form>, ResourceError> {
    Ok(Json(resources.get_form(form_id).await?))
}

#[utoipa::path(
    post,
    path = "/forms",
    request_body = FormTitle,
    responses(
        (status = 201, description = "Form created", body = Form),
        (status = 401, description = "Missing or invalid token"),
        (status = 422, description = "Title out of bounds", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "forms"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn create_form(
    principal: Principal,
    resources: Extension<Arc<dyn ResourceApi>>,
    Json(form): Json<FormTitle>,
) -> Result<(StatusCode, Json<Form>), ResourceError> {
    let form = resources.create_form(principal.user_id, form).await?;
    Ok((StatusCode::CREATED, Json(form)))
}

#[utoipa::path(
    patch,
    path = "/forms/{form_id}",
    params(("form_id" = Uuid, Path, description = "Form id")),
    request_body = FormTitle,
    responses(
        (status = 200, description = "Form updated"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "The caller does not own the form", body = ErrorBody),
        (status = 404, description = "No such form", body = ErrorBody),
        (status = 422, description = "Title out of bounds", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "forms"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id, form_id = %form_id))]
pub async fn update_form(
    principal: Principal,
    Path(form_id): Path<Uuid>,
    resources: Extension<Arc<dyn ResourceApi>>,
    Json(patch): Json<FormTitle>,
) -> Result<StatusCode, ResourceError> {
    resources
        .update_form(form_id, principal.user_id, patch)
        .await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/forms/{form_id}",
    params(("form_id" = Uuid, Path, description = "Form id")),
    responses(
        (status = 200, description = "Form and its schemas deleted"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "The caller does not own the form", body = ErrorBody),
        (status = 404, description = "No such form", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "forms"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id, form_id = %form_id))]
pub async fn delete_form(
    principal: Principal,
    Path(form_id): Path<Uuid>,
    resources: Extension<Arc<dyn ResourceApi>>,
) -> Result<StatusCode, ResourceError> {
    resources.delete_form(form_id, principal.user_id).await?;
    Ok(StatusCode::OK)
}
