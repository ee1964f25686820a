//! Error taxonomy for CRM calls
//!
//! Four surfaced classes: transport failures, unauthorized (expired/invalid
//! token — the only class the interceptor acts on), CRM logical errors
//! (well-formed request, business-rule rejection), and decode failures for
//! responses that don't match the documented shape.

/// Errors from CRM gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unauthorized ({error}): {description}")]
    Unauthorized { error: String, description: String },

    #[error("crm error ({error}): {description}")]
    Api { error: String, description: String },

    #[error("invalid CRM response: {0}")]
    Decode(String),

    #[error("no stored credentials; complete the OAuth flow first")]
    MissingCredentials,

    #[error("token refresh failed: {0}")]
    Refresh(String),
}

impl Error {
    /// Label for metrics.
    pub(crate) fn outcome_label(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Unauthorized { .. } => "unauthorized",
            Error::Api { .. } => "crm_error",
            Error::Decode(_) => "decode",
            Error::MissingCredentials => "no_credentials",
            Error::Refresh(_) => "refresh_failed",
        }
    }
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
