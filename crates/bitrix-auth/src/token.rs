//! OAuth token exchange and refresh against the Bitrix24 portal
//!
//! Both operations are GET requests to `{domain}/oauth/token/` with the
//! grant parameters in the query string — Bitrix does not accept a form
//! body here. The two grant types:
//! 1. `authorization_code` — initial flow completion (OAuth callback)
//! 2. `refresh_token` — request-time refresh after an expired-token failure

use serde::{Deserialize, Serialize};

use common::SecretString;

use crate::error::{Error, Result};

/// OAuth client registration for the Bitrix24 local application.
///
/// The secret is loaded from the environment or a secret file by the
/// service config, never from the TOML itself.
#[derive(Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: SecretString,
}

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. `domain` echoes
/// the portal the tokens are valid for; Bitrix includes it, but the gateway
/// is configured with a fixed portal and only logs it.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Exchange an authorization code for a token pair (initial OAuth flow).
pub async fn exchange_code(
    client: &reqwest::Client,
    domain: &str,
    app: &OAuthApp,
    code: &str,
) -> Result<TokenResponse> {
    request_token(
        client,
        domain,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &app.client_id),
            ("client_secret", app.client_secret.expose()),
            ("code", code),
        ],
        "token exchange",
    )
    .await
}

/// Obtain a fresh token pair using the current refresh token.
///
/// Called by the request-layer refresh coordinator when the CRM reports an
/// expired access token, and by the manual refresh endpoint.
pub async fn refresh(
    client: &reqwest::Client,
    domain: &str,
    app: &OAuthApp,
    refresh_token: &str,
) -> Result<TokenResponse> {
    request_token(
        client,
        domain,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", &app.client_id),
            ("client_secret", app.client_secret.expose()),
            ("refresh_token", refresh_token),
        ],
        "token refresh",
    )
    .await
}

async fn request_token(
    client: &reqwest::Client,
    domain: &str,
    params: &[(&str, &str)],
    op: &str,
) -> Result<TokenResponse> {
    let url = format!("{}/oauth/token/", domain.trim_end_matches('/'));

    let response = client
        .get(&url)
        .query(params)
        .send()
        .await
        .map_err(|e| Error::Http(format!("{op} request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 400 invalid_grant / 401 / 403 mean the code or refresh token is
        // rejected; anything else is an endpoint-side failure
        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(Error::InvalidCredentials(format!(
                "{op} rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "{op} returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid {op} response: {e}")))
}
