//! Bearer-token sessions.
//!
//! Handlers that need a caller take a [`Principal`] argument. Extraction reads
//! `Authorization: Bearer <token>`, resolves it through [`AuthApi::authenticate`]
//! and stores the principal in the request extensions. Every failure is a bare
//! `401`, so callers cannot tell a bad signature from an expired token.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::auth::AuthApi;

/// Authenticated caller of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(*principal);
        }

        let Some(auth) = parts.extensions.get::<Arc<dyn AuthApi>>().cloned() else {
            error!("AuthApi extension missing from router");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        };
        let token = extract_bearer_token(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;
        let user_id = auth
            .authenticate(&token)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        let principal = Principal { user_id };
        parts.extensions.insert(principal);
        Ok(principal)
    }
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
