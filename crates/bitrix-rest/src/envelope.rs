//! CRM response envelope normalization
//!
//! Every REST method answers with `{result, total?, error?, error_description?}`.
//! Bitrix is loose about status codes: logical errors can arrive with 200, and
//! an expired access token arrives as 401 or as 400 with an "expired" error
//! text. `interpret` folds status + body into the gateway error taxonomy.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Raw wire envelope as Bitrix sends it.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Successful call payload: the `result` value plus the CRM's own total.
#[derive(Debug)]
pub struct Payload {
    pub result: Value,
    pub total: Option<u64>,
}

/// Fold an HTTP status and response body into a payload or a classified error.
///
/// Rules, in order:
/// - unparsable body: Transport for non-2xx, Decode for 2xx
/// - 401: Unauthorized, whatever the body says
/// - non-empty `error`: Unauthorized when 400 + "expired" text, Api otherwise
///   (including with a 200 status)
/// - other non-2xx without an error field: Transport
pub(crate) fn interpret(status: u16, body: &str) -> Result<Payload> {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            let snippet: String = body.chars().take(200).collect();
            return Err(if (200..300).contains(&status) {
                Error::Decode(format!("unparsable response body: {e}: {snippet}"))
            } else {
                Error::Transport(format!("crm returned {status}: {snippet}"))
            });
        }
    };

    let error = envelope.error.unwrap_or_default();
    let description = envelope.error_description.unwrap_or_default();

    if status == 401 {
        return Err(Error::Unauthorized {
            error: if error.is_empty() {
                "unauthorized".into()
            } else {
                error
            },
            description,
        });
    }

    if !error.is_empty() {
        if status == 400 && mentions_expiry(&error, &description) {
            return Err(Error::Unauthorized { error, description });
        }
        return Err(Error::Api { error, description });
    }

    if !(200..300).contains(&status) {
        return Err(Error::Transport(format!("crm returned {status}")));
    }

    Ok(Payload {
        result: envelope.result,
        total: envelope.total,
    })
}

fn mentions_expiry(error: &str, description: &str) -> bool {
    let needle = "expired";
    error.to_ascii_lowercase().contains(needle)
        || description.to_ascii_lowercase().contains(needle)
}
