//! Bitrix24 OAuth authentication library
//!
//! Provides authorization-code exchange, token refresh, and persistent
//! storage for the single active access/refresh token pair. This crate is a
//! standalone library with no dependency on the gateway binary — it can be
//! tested and used independently.
//!
//! Credential flow:
//! 1. User authorizes the app in the Bitrix24 portal and is redirected back
//!    with an authorization code
//! 2. Gateway calls `token::exchange_code()` with that code
//! 3. The resulting pair is stored via `store::TokenStore::replace()`
//! 4. When the CRM rejects an access token as expired, the request layer
//!    calls `token::refresh()` with the stored refresh token
//! 5. The refreshed pair overwrites the store (in memory and on disk)

pub mod error;
pub mod store;
pub mod token;

pub use error::{Error, Result};
pub use store::{Credentials, TokenStore};
pub use token::{OAuthApp, TokenResponse, exchange_code, refresh};
