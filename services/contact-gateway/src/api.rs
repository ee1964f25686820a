//! Inbound contact endpoints
//!
//! All contact routes are keyed by an `access_token` query parameter,
//! validated for presence before any CRM call. Response envelopes mirror the
//! console UI's expectations: `{success, ...}` with camelCase keys for
//! operation outcomes and SCREAMING keys for contact payloads.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use contacts::Contact;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub access_token: Option<String>,
    pub search: Option<String>,
    pub filters: Option<String>,
    #[serde(default)]
    pub start: u64,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContactBody {
    pub contact: Option<Contact>,
}

/// Presence check for the inbound access token. Rejected locally — no
/// network call happens for an unkeyed request.
fn require_access_token(token: &Option<String>) -> Result<(), ApiError> {
    match token.as_deref().filter(|t| !t.is_empty()) {
        Some(_) => Ok(()),
        None => Err(ApiError::Validation("Access token is required".into())),
    }
}

/// Attach `success: true` to a serialized operation outcome.
fn success_envelope<T: serde::Serialize>(outcome: &T) -> Result<Json<Value>, ApiError> {
    let mut payload =
        serde_json::to_value(outcome).map_err(|e| ApiError::Internal(e.to_string()))?;
    if let Some(map) = payload.as_object_mut() {
        map.insert("success".into(), json!(true));
    }
    Ok(Json(payload))
}

/// GET /contacts — list with optional search/filters and pagination offset.
pub async fn list_contacts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    require_access_token(&query.access_token)?;

    let list = state
        .service
        .list(
            query.search.as_deref(),
            query.filters.as_deref(),
            query.start,
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "contacts": list.contacts,
        "pagination": list.pagination,
    })))
}

/// POST /contacts — create a contact (and its requisite/bank detail when
/// bank data is present).
pub async fn create_contact(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<ContactBody>,
) -> Result<Json<Value>, ApiError> {
    let Some(contact) = body.contact else {
        return Err(ApiError::Validation("Contact data is required".into()));
    };
    require_access_token(&query.access_token)?;

    let outcome = state.service.create(&contact).await?;
    success_envelope(&outcome)
}

/// PUT /contacts/{id} — update the contact; the requisite side is
/// best-effort and reported through the structured outcome.
pub async fn update_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<ContactBody>,
) -> Result<Json<Value>, ApiError> {
    let Some(contact) = body.contact else {
        return Err(ApiError::Validation("Invalid contact data".into()));
    };
    require_access_token(&query.access_token)?;

    let outcome = state.service.update(&id, &contact).await?;
    success_envelope(&outcome)
}

/// DELETE /contacts/{id} — delete the contact record only.
pub async fn delete_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    if id.is_empty() {
        return Err(ApiError::Validation("Contact ID is required".into()));
    }
    require_access_token(&query.access_token)?;

    let deleted = state.service.delete(&id).await?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}
