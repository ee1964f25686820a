//! CRM REST client with the expired-token interceptor
//!
//! `RestClient::call` performs one RPC-style POST to
//! `{domain}/rest/<method>` with the stored access token injected as `auth`.
//! On an unauthorized failure it joins the single-flight refresh and replays
//! the original call exactly once with the refreshed token; if the refresh
//! itself fails, the original error propagates unchanged. No other retries
//! happen at this layer.
//!
//! The typed operations below cover exactly the CRM methods this system
//! uses: contact list/add/update/delete, requisite list/add, and bank detail
//! list/add/update/delete.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use bitrix_auth::{Credentials, OAuthApp, TokenStore};

use crate::envelope::{Payload, interpret};
use crate::error::{Error, Result};
use crate::refresh::{RefreshCoordinator, RefreshFailure};

/// CRM method names, one per gateway operation.
mod methods {
    pub const CONTACT_LIST: &str = "crm.contact.list";
    pub const CONTACT_ADD: &str = "crm.contact.add";
    pub const CONTACT_UPDATE: &str = "crm.contact.update";
    pub const CONTACT_DELETE: &str = "crm.contact.delete";
    pub const REQUISITE_LIST: &str = "crm.requisite.list";
    pub const REQUISITE_ADD: &str = "crm.requisite.add";
    pub const BANK_DETAIL_LIST: &str = "crm.requisite.bankdetail.list";
    pub const BANK_DETAIL_ADD: &str = "crm.requisite.bankdetail.add";
    pub const BANK_DETAIL_UPDATE: &str = "crm.requisite.bankdetail.update";
    pub const BANK_DETAIL_DELETE: &str = "crm.requisite.bankdetail.delete";
}

/// A decoded list page: the items plus the CRM-reported total.
#[derive(Debug)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Gateway to one Bitrix24 portal.
///
/// The token store is the single credential source: it is read on every call
/// and written only by a successful refresh (or the OAuth callback).
pub struct RestClient {
    http: reqwest::Client,
    domain: String,
    app: OAuthApp,
    store: Arc<TokenStore>,
    refresh: RefreshCoordinator,
}

impl RestClient {
    pub fn new(
        http: reqwest::Client,
        domain: impl Into<String>,
        app: OAuthApp,
        store: Arc<TokenStore>,
    ) -> Self {
        let domain: String = domain.into();
        let domain = domain.trim_end_matches('/').to_string();
        Self {
            http,
            domain,
            app,
            store,
            refresh: RefreshCoordinator::new(),
        }
    }

    /// The token store backing this client.
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// One CRM call with the refresh interceptor applied.
    ///
    /// `params` must be a JSON object; the `auth` field is injected here.
    pub async fn call(&self, method: &'static str, params: Value) -> Result<Payload> {
        let access = self
            .store
            .access_token()
            .await
            .ok_or(Error::MissingCredentials)?;

        match self.send(method, &params, &access).await {
            Err(original @ Error::Unauthorized { .. }) => {
                debug!(method, "access token rejected, joining refresh");
                match self.refresh_credentials().await {
                    // Replay exactly once with whatever pair the refresh produced;
                    // the replay's outcome is final, success or not
                    Ok(credentials) => self.send(method, &params, &credentials.access_token).await,
                    Err(failure) => {
                        warn!(method, error = %failure, "refresh failed, propagating original error");
                        Err(original)
                    }
                }
            }
            outcome => outcome,
        }
    }

    /// Force a refresh through the single-flight coordinator.
    ///
    /// Used by the manual refresh endpoint; request-path refreshes go through
    /// `call` and never surface the refresh error itself.
    pub async fn refresh_now(&self) -> Result<Credentials> {
        self.refresh_credentials()
            .await
            .map_err(|f| Error::Refresh(f.to_string()))
    }

    async fn refresh_credentials(&self) -> std::result::Result<Credentials, RefreshFailure> {
        self.refresh
            .refresh(
                self.http.clone(),
                self.domain.clone(),
                self.app.clone(),
                self.store.clone(),
            )
            .await
    }

    /// Single outbound attempt. No retries here.
    async fn send(&self, method: &'static str, params: &Value, access_token: &str) -> Result<Payload> {
        let url = format!("{}/rest/{}", self.domain, method);
        let mut body = params.as_object().cloned().unwrap_or_default();
        body.insert("auth".into(), Value::String(access_token.to_string()));

        let started = Instant::now();
        let outcome = async {
            let response = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::Transport(format!("{method} request failed: {e}")))?;

            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| Error::Transport(format!("{method} response read failed: {e}")))?;

            interpret(status, &text)
        }
        .await;

        let label = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.outcome_label(),
        };
        metrics::counter!("crm_requests_total", "method" => method, "outcome" => label)
            .increment(1);
        metrics::histogram!("crm_request_duration_seconds", "method" => method)
            .record(started.elapsed().as_secs_f64());

        outcome
    }

    // --- typed operations ---

    /// `crm.contact.list` — filtered, ordered by ID ascending, offset `start`.
    /// Page size is fixed server-side at 50.
    pub async fn contact_list<T: DeserializeOwned>(
        &self,
        filter: Value,
        select: &[&str],
        start: u64,
    ) -> Result<Paged<T>> {
        let payload = self
            .call(
                methods::CONTACT_LIST,
                json!({
                    "filter": filter,
                    "select": select,
                    "start": start,
                    "order": { "ID": "ASC" },
                }),
            )
            .await?;
        Ok(Paged {
            items: decode_list(payload.result, methods::CONTACT_LIST)?,
            total: payload.total.unwrap_or(0),
        })
    }

    /// `crm.contact.add` — returns the new contact ID.
    pub async fn contact_add<F: Serialize>(&self, fields: &F) -> Result<String> {
        let payload = self
            .call(methods::CONTACT_ADD, json!({ "fields": fields }))
            .await?;
        entity_id(&payload.result)
            .ok_or_else(|| Error::Decode("crm.contact.add returned no id".into()))
    }

    /// `crm.contact.update`.
    pub async fn contact_update<F: Serialize>(&self, id: &str, fields: &F) -> Result<Value> {
        let payload = self
            .call(methods::CONTACT_UPDATE, json!({ "id": id, "fields": fields }))
            .await?;
        Ok(payload.result)
    }

    /// `crm.contact.delete`.
    pub async fn contact_delete(&self, id: &str) -> Result<Value> {
        let payload = self
            .call(methods::CONTACT_DELETE, json!({ "id": id }))
            .await?;
        Ok(payload.result)
    }

    /// `crm.requisite.list`.
    pub async fn requisite_list<T: DeserializeOwned>(
        &self,
        filter: Value,
        select: &[&str],
    ) -> Result<Vec<T>> {
        let payload = self
            .call(
                methods::REQUISITE_LIST,
                json!({ "filter": filter, "select": select }),
            )
            .await?;
        decode_list(payload.result, methods::REQUISITE_LIST)
    }

    /// `crm.requisite.add` — returns the new requisite ID.
    pub async fn requisite_add<F: Serialize>(&self, fields: &F) -> Result<String> {
        let payload = self
            .call(methods::REQUISITE_ADD, json!({ "fields": fields }))
            .await?;
        entity_id(&payload.result)
            .ok_or_else(|| Error::Decode("crm.requisite.add returned no id".into()))
    }

    /// `crm.requisite.bankdetail.list`.
    pub async fn bank_detail_list<T: DeserializeOwned>(
        &self,
        filter: Value,
        select: &[&str],
    ) -> Result<Vec<T>> {
        let payload = self
            .call(
                methods::BANK_DETAIL_LIST,
                json!({ "filter": filter, "select": select }),
            )
            .await?;
        decode_list(payload.result, methods::BANK_DETAIL_LIST)
    }

    /// `crm.requisite.bankdetail.add` — returns the new bank detail ID.
    pub async fn bank_detail_add<F: Serialize>(&self, fields: &F) -> Result<String> {
        let payload = self
            .call(methods::BANK_DETAIL_ADD, json!({ "fields": fields }))
            .await?;
        entity_id(&payload.result)
            .ok_or_else(|| Error::Decode("crm.requisite.bankdetail.add returned no id".into()))
    }

    /// `crm.requisite.bankdetail.update`.
    pub async fn bank_detail_update<F: Serialize>(&self, id: &str, fields: &F) -> Result<Value> {
        let payload = self
            .call(
                methods::BANK_DETAIL_UPDATE,
                json!({ "id": id, "fields": fields }),
            )
            .await?;
        Ok(payload.result)
    }

    /// `crm.requisite.bankdetail.delete`.
    pub async fn bank_detail_delete(&self, id: &str) -> Result<Value> {
        let payload = self
            .call(methods::BANK_DETAIL_DELETE, json!({ "id": id }))
            .await?;
        Ok(payload.result)
    }
}

/// Decode a list `result`. A null/absent result decodes as an empty list,
/// matching how Bitrix omits `result` on empty queries.
fn decode_list<T: DeserializeOwned>(result: Value, method: &str) -> Result<Vec<T>> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(result).map_err(|e| Error::Decode(format!("{method} result: {e}")))
}

/// Bitrix returns newly created IDs as numbers; elsewhere IDs travel as
/// strings. Normalize both to a string.
fn entity_id(result: &Value) -> Option<String> {
    match result {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
