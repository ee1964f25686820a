//! HTTP error mapping for the inbound API
//!
//! Taxonomy: validation failures are rejected locally (400, no network
//! call); unauthorized failures that survived the transparent retry surface
//! as 401; CRM logical errors carry the CRM's own message (400); transport
//! and decode failures are internal (500).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API-surface error, ready to render as the JSON error envelope.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Unauthorized(String),
    Crm(String),
    Internal(String),
}

impl From<bitrix_rest::Error> for ApiError {
    fn from(err: bitrix_rest::Error) -> Self {
        use bitrix_rest::Error as E;
        match err {
            E::Unauthorized { .. } => {
                ApiError::Unauthorized("Unauthorized access. Please check your access token.".into())
            }
            E::MissingCredentials => ApiError::Unauthorized(
                "No stored credentials. Complete the OAuth flow first.".into(),
            ),
            E::Refresh(msg) => ApiError::Unauthorized(format!("Failed to refresh token: {msg}")),
            E::Api { error, description } => ApiError::Crm(if description.is_empty() {
                error
            } else {
                description
            }),
            E::Transport(msg) | E::Decode(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            ApiError::Crm(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal server error", "details": msg }),
            ),
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_gateway_errors_map_to_401() {
        let err: ApiError = bitrix_rest::Error::Unauthorized {
            error: "expired_token".into(),
            description: "The access token provided has expired".into(),
        }
        .into();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(
            err.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn crm_errors_keep_the_crm_message() {
        let err: ApiError = bitrix_rest::Error::Api {
            error: "NOT_FOUND".into(),
            description: "Contact not found".into(),
        }
        .into();
        match &err {
            ApiError::Crm(msg) => assert_eq!(msg, "Contact not found"),
            other => panic!("expected Crm, got {other:?}"),
        }
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn crm_errors_without_description_fall_back_to_the_code() {
        let err: ApiError = bitrix_rest::Error::Api {
            error: "ERROR_CORE".into(),
            description: String::new(),
        }
        .into();
        match err {
            ApiError::Crm(msg) => assert_eq!(msg, "ERROR_CORE"),
            other => panic!("expected Crm, got {other:?}"),
        }
    }

    #[test]
    fn transport_errors_are_internal() {
        let err: ApiError = bitrix_rest::Error::Transport("connection refused".into()).into();
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_errors_are_400() {
        let response = ApiError::Validation("Access token is required".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
