//! Bitrix24 REST gateway
//!
//! Thin request layer over the CRM's RPC-style HTTP endpoints
//! (`{domain}/rest/<entity>.<verb>`), with the expired-token interceptor
//! built in. Responsibilities:
//!
//! 1. One typed operation per CRM method (contact, requisite, bank detail)
//! 2. Normalizing the CRM's ad-hoc error envelope: any body with a non-empty
//!    `error` is a logical failure regardless of HTTP status
//! 3. Classifying unauthorized failures (401, or 400 with an "expired"
//!    error text) and coalescing concurrent token refreshes into a single
//!    in-flight refresh, replaying each original call at most once

pub mod client;
pub mod envelope;
pub mod error;
pub mod refresh;

pub use client::{Paged, RestClient};
pub use envelope::Payload;
pub use error::{Error, Result};
