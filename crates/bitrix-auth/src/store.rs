//! Persistent storage for the active token pair
//!
//! The gateway holds exactly one access/refresh pair for its configured
//! portal. The pair lives in memory behind a tokio Mutex and is mirrored to a
//! JSON file keyed by field name (`access_token`, `refresh_token`). All
//! writes use atomic temp-file + rename to prevent corruption on crash.
//!
//! The file is read once at process start and overwritten after every
//! successful refresh or OAuth callback. No token history is retained.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The active access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

/// Thread-safe holder of the single active token pair, with a file sink.
///
/// Reads briefly lock to clone the pair, so request-time reads don't block
/// on a concurrent persist.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    state: Mutex<Option<Credentials>>,
}

impl TokenStore {
    /// Load the token pair from the given file path.
    ///
    /// A missing file is a cold start: the store begins empty and the file is
    /// created as `{}`. The gateway cannot reach the CRM until the OAuth
    /// callback populates it.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading token file: {e}")))?;
            let fields: BTreeMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::TokenParse(format!("parsing token file: {e}")))?;

            match (fields.get("access_token"), fields.get("refresh_token")) {
                (Some(access), Some(refresh)) => {
                    info!(path = %path.display(), "loaded stored token pair");
                    Some(Credentials {
                        access_token: access.clone(),
                        refresh_token: refresh.clone(),
                    })
                }
                _ => {
                    info!(path = %path.display(), "token file has no stored pair");
                    None
                }
            }
        } else {
            info!(path = %path.display(), "token file not found, starting without credentials");
            write_atomic(&path, None).await?;
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of the current pair, if any.
    pub async fn get(&self) -> Option<Credentials> {
        self.state.lock().await.clone()
    }

    /// Current access token, if a pair is stored.
    pub async fn access_token(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.as_ref().map(|c| c.access_token.clone())
    }

    /// Whether no pair is stored yet.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_none()
    }

    /// Replace the pair in memory and persist it to disk.
    ///
    /// Called after a successful refresh or OAuth callback. The previous pair
    /// is discarded; there is no history.
    pub async fn replace(&self, credentials: Credentials) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = Some(credentials);
        debug!("token pair replaced");
        write_atomic(&self.path, state.as_ref()).await
    }
}

/// Write the token pair to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains live OAuth tokens. An empty store serializes as `{}`.
async fn write_atomic(path: &Path, credentials: Option<&Credentials>) -> Result<()> {
    let fields: BTreeMap<&str, &str> = match credentials {
        Some(c) => BTreeMap::from([
            ("access_token", c.access_token.as_str()),
            ("refresh_token", c.refresh_token.as_str()),
        ]),
        None => BTreeMap::new(),
    };
    let json = serde_json::to_string_pretty(&fields)
        .map_err(|e| Error::TokenParse(format!("serializing token file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token file path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".tokens.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted token pair");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(suffix: &str) -> Credentials {
        Credentials {
            access_token: format!("at_{suffix}"),
            refresh_token: format!("rt_{suffix}"),
        }
    }

    #[tokio::test]
    async fn roundtrip_replace_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::load(path.clone()).await.unwrap();
        store.replace(pair("1")).await.unwrap();

        let store2 = TokenStore::load(path).await.unwrap();
        assert_eq!(store2.get().await, Some(pair("1")));
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        assert!(!path.exists());
        let store = TokenStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn file_is_keyed_by_field_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::load(path.clone()).await.unwrap();
        store.replace(pair("x")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.get("access_token").unwrap(), "at_x");
        assert_eq!(parsed.get("refresh_token").unwrap(), "rt_x");
    }

    #[tokio::test]
    async fn replace_overwrites_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::load(path).await.unwrap();
        store.replace(pair("old")).await.unwrap();
        store.replace(pair("new")).await.unwrap();

        assert_eq!(store.access_token().await.as_deref(), Some("at_new"));
        assert_eq!(store.get().await.unwrap().refresh_token, "rt_new");
    }

    #[tokio::test]
    async fn partial_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, r#"{"access_token":"at_only"}"#)
            .await
            .unwrap();

        let store = TokenStore::load(path).await.unwrap();
        assert!(store.is_empty().await, "half a pair is no pair");
    }

    #[tokio::test]
    async fn corrupt_file_returns_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, "not json {{").await.unwrap();

        let err = TokenStore::load(path).await.unwrap_err();
        assert!(matches!(err, Error::TokenParse(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::load(path.clone()).await.unwrap();
        store.replace(pair("1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_replaces_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = std::sync::Arc::new(TokenStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.replace(pair(&i.to_string())).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // One of the writers won; the file must be valid JSON with a full pair
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.contains_key("access_token"));
        assert!(parsed.contains_key("refresh_token"));
    }
}
