//! HTTP mapping of service errors.
//!
//! Client errors carry a short JSON message. Persistence and internal failures
//! are logged here and surface as a bare `500`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::{auth::AuthError, resources::ResourceError};

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

fn reject(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidInput(_) => reject(StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            Self::UsernameTaken => reject(StatusCode::CONFLICT, self.to_string()),
            Self::InvalidCredentials => reject(StatusCode::UNAUTHORIZED, self.to_string()),
            Self::Unauthenticated => StatusCode::UNAUTHORIZED.into_response(),
            Self::NotFound => reject(StatusCode::NOT_FOUND, self.to_string()),
            Self::Store(err) => {
                error!("Database error: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            Self::Internal(message) => {
                error!("Internal error: {message}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl IntoResponse for ResourceError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidInput(_) => reject(StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            Self::NotFound => reject(StatusCode::NOT_FOUND, self.to_string()),
            Self::PermissionDenied => {
                debug!("Permission denied");
                reject(StatusCode::FORBIDDEN, self.to_string())
            }
            Self::Store(err) => {
                error!("Database error: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            Self::Internal(message) => {
                error!("Internal error: {message}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::time::Duration;

    #[test]
    fn status_codes() {
        let cases = [
            (AuthError::InvalidInput("bad").into_response(), 422),
            (AuthError::UsernameTaken.into_response(), 409),
            (AuthError::InvalidCredentials.into_response(), 401),
            (AuthError::Unauthenticated.into_response(), 401),
            (AuthError::NotFound.into_response(), 404),
            (ResourceError::PermissionDenied.into_response(), 403),
            (ResourceError::NotFound.into_response(), 404),
            (ResourceError::InvalidInput("bad").into_response(), 422),
            (
                ResourceError::Store(StoreError::Timeout(Duration::from_secs(5))).into_response(),
                500,
            ),
        ];
        for (response, status) in cases {
            assert_eq!(response.status().as_u16(), status);
        }
    }
}
