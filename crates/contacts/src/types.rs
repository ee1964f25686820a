//! Entity types for the contact domain
//!
//! Two families: server wire records exactly as the CRM sends them (flat,
//! SCREAMING field names, `UF_CRM_*` custom-field keys) and the normalized
//! shape the inbound API exposes. All of them are transient request/response
//! DTOs — the CRM owns the data.

use serde::{Deserialize, Serialize};

/// Custom-field key the portal assigned to the contact's address.
pub const FIELD_ADDRESS: &str = "UF_CRM_1749491137";
/// Custom-field key for the contact-level bank name (legacy, read-only here;
/// bank data is written to the bank detail entity).
pub const FIELD_BANK_NAME: &str = "UF_CRM_1749488806735";
/// Custom-field key for the contact-level account number (legacy, read-only).
pub const FIELD_ACCOUNT_NUMBER: &str = "UF_CRM_1749488831655";

/// `ENTITY_TYPE_ID` value marking a requisite as attached to a contact.
pub const CONTACT_ENTITY_TYPE_ID: u32 = 3;
/// Requisite preset used for contacts created through this gateway.
pub const REQUISITE_PRESET_ID: u32 = 1;

/// One entry of a multi-value communication channel (PHONE, EMAIL, WEB).
///
/// The CRM stores an ordered sequence per channel; this system reads and
/// writes only the first entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct MultiField {
    pub id: String,
    pub value: String,
    pub value_type: String,
    pub type_id: String,
}

impl Default for MultiField {
    fn default() -> Self {
        Self {
            id: String::new(),
            value: String::new(),
            value_type: "WORK".into(),
            type_id: String::new(),
        }
    }
}

impl MultiField {
    /// Entry with the given value and the usual defaults (`WORK` type).
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }
}

/// Contact record as the CRM sends and receives it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct ContactRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub phone: Vec<MultiField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub email: Vec<MultiField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub web: Vec<MultiField>,
    #[serde(rename = "UF_CRM_1749491137", skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "UF_CRM_1749488806735", skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    #[serde(rename = "UF_CRM_1749488831655", skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
}

/// Normalized contact as exposed to API clients.
///
/// Absent server fields surface as explicit nulls, never as missing keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct Contact {
    pub id: Option<String>,
    pub name: Option<String>,
    pub phone: Vec<MultiField>,
    pub email: Vec<MultiField>,
    pub web: Vec<MultiField>,
    pub address: Option<String>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub requisites: Vec<Requisite>,
}

/// Requisite: a billing profile attached to exactly one contact.
///
/// The CRM allows many bank details per requisite; this system attaches at
/// most one (the last listed wins when the CRM returns several).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct Requisite {
    pub id: String,
    pub entity_type_id: String,
    pub entity_id: String,
    pub preset_id: Option<String>,
    pub bank_detail: Option<BankDetail>,
}

/// Bank name/account number pair owned by a requisite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct BankDetail {
    pub id: String,
    pub entity_id: String,
    pub name: String,
    pub rq_bank_name: String,
    pub rq_acc_num: String,
}
