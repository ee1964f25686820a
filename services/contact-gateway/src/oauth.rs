//! OAuth flow endpoints
//!
//! `/oauth/callback` completes the authorization-code flow using the
//! configured client credentials and persists the resulting pair.
//! `/oauth/refresh` forces a refresh through the same single-flight
//! coordinator the request path uses.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use bitrix_auth::Credentials;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
}

/// GET /oauth/callback — exchange the authorization code and store the pair.
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.error.is_some() {
        return Err(ApiError::Validation("Authorization failed".into()));
    }
    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        return Err(ApiError::Validation("No authorization code provided".into()));
    };

    let token = bitrix_auth::exchange_code(&state.http, &state.domain, &state.oauth_app, code)
        .await
        .map_err(|e| match e {
            bitrix_auth::Error::InvalidCredentials(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Internal(format!("Failed to process authorization: {other}")),
        })?;

    state
        .store
        .replace(Credentials {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!("oauth callback stored a new token pair");

    Ok(Json(json!({
        "success": true,
        "access_token": token.access_token,
        "refresh_token": token.refresh_token,
        "expires_in": token.expires_in,
        "domain": token.domain,
    })))
}

/// GET /oauth/refresh — force a token refresh and return the new pair.
pub async fn refresh_tokens(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let credentials = state.client.refresh_now().await?;
    Ok(Json(json!({
        "success": true,
        "access_token": credentials.access_token,
        "refresh_token": credentials.refresh_token,
    })))
}
