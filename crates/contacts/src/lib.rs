//! Contact domain core
//!
//! Everything between the inbound API surface and the CRM gateway:
//!
//! - wire record types for the three CRM entities (contact, requisite,
//!   bank detail) and the normalized client-facing contact shape
//! - the bidirectional contact normalizer (flat `UF_CRM_*` custom fields ↔
//!   named attributes)
//! - anchored phone-prefix transforms (local `0…` ↔ international `+84…`)
//! - filter composition splitting the structured filter set into
//!   contact-level and bank-detail-level groups
//! - the `ContactService` orchestrator: list with client-side requisite
//!   joins, create with compensating rollback, update with partial-result
//!   reporting, delete

pub mod filter;
pub mod normalize;
pub mod phone;
pub mod service;
pub mod types;

pub use service::{ContactList, ContactService, CreateOutcome, Pagination, UpdateOutcome};
pub use types::{BankDetail, Contact, ContactRecord, MultiField, Requisite};
