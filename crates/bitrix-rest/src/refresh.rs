//! Single-flight token refresh coordination
//!
//! The credential pair is the one shared mutable resource in the system, so
//! refreshes must coalesce: however many callers observe an expired-token
//! failure at once, exactly one refresh call goes out, and every caller
//! blocked behind it observes the same outcome.
//!
//! Implemented as one pending `Shared` future guarded by a mutex. The first
//! caller to find no pending refresh creates and registers the future; later
//! callers clone it and await. Whoever finishes first clears the slot (only
//! if it still holds the same future, so a newer refresh is never dropped).

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{info, warn};

use bitrix_auth::{Credentials, OAuthApp, TokenStore};

/// Clonable refresh failure, shared by every waiter of a coalesced refresh.
#[derive(Debug, Clone)]
pub struct RefreshFailure(pub String);

impl std::fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) type RefreshOutcome = std::result::Result<Credentials, RefreshFailure>;

type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Coalesces concurrent refresh attempts onto a single in-flight call.
pub(crate) struct RefreshCoordinator {
    pending: Mutex<Option<PendingRefresh>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// Join the in-flight refresh, or start one if none is pending.
    pub async fn refresh(
        &self,
        http: reqwest::Client,
        domain: String,
        app: OAuthApp,
        store: Arc<TokenStore>,
    ) -> RefreshOutcome {
        let fut = {
            let mut pending = self.pending.lock().await;
            match pending.as_ref() {
                Some(inflight) => inflight.clone(),
                None => {
                    let fut = run_refresh(http, domain, app, store).boxed().shared();
                    *pending = Some(fut.clone());
                    fut
                }
            }
        };

        let outcome = fut.clone().await;

        let mut pending = self.pending.lock().await;
        if let Some(inflight) = pending.as_ref() {
            if inflight.ptr_eq(&fut) {
                *pending = None;
            }
        }

        outcome
    }
}

/// Perform one refresh: call the OAuth endpoint with the stored refresh
/// token and overwrite the store with the resulting pair.
///
/// A persist failure is logged but does not fail the refresh — the new pair
/// is already live in memory and the next successful persist will catch up.
async fn run_refresh(
    http: reqwest::Client,
    domain: String,
    app: OAuthApp,
    store: Arc<TokenStore>,
) -> RefreshOutcome {
    let Some(current) = store.get().await else {
        return Err(RefreshFailure("no stored credentials to refresh".into()));
    };

    match bitrix_auth::refresh(&http, &domain, &app, &current.refresh_token).await {
        Ok(token) => {
            let credentials = Credentials {
                access_token: token.access_token,
                refresh_token: token.refresh_token,
            };
            if let Err(e) = store.replace(credentials.clone()).await {
                warn!(error = %e, "failed to persist refreshed token pair");
            }
            metrics::counter!("crm_token_refresh_total", "outcome" => "success").increment(1);
            info!("token refresh succeeded");
            Ok(credentials)
        }
        Err(e) => {
            metrics::counter!("crm_token_refresh_total", "outcome" => "failure").increment(1);
            warn!(error = %e, "token refresh failed");
            Err(RefreshFailure(e.to_string()))
        }
    }
}
