//! Filter composition for contact listing
//!
//! The inbound API accepts a free-text name search plus a JSON-encoded
//! structured filter set. Filters split into two disjoint groups: those the
//! CRM can apply directly on `crm.contact.list` (name, province, phone,
//! email) and those that live on the bank detail entity (bank name, account
//! number) and force the client-side join in the orchestrator.
//!
//! Bitrix filter key conventions: a `%` prefix means substring match, a bare
//! key means exact match.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::phone::format_phone;
use crate::types::FIELD_ADDRESS;

/// Structured filter set as the client sends it (JSON-encoded query param).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterInput {
    pub province: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
}

/// The two disjoint filter groups plus the join-mode flag.
#[derive(Debug, Default)]
pub struct FilterSet {
    pub contact: Map<String, Value>,
    pub bank_detail: Map<String, Value>,
    pub has_bank_detail: bool,
}

/// Build the CRM filter groups from the raw query inputs.
///
/// Malformed `filters` JSON is logged and ignored — listing degrades to the
/// search-only filter rather than failing the request. Empty strings count
/// as absent, and a bank name of `"all"` is the UI's "no filter" sentinel.
pub fn build_filters(search: Option<&str>, filters_json: Option<&str>) -> FilterSet {
    let mut set = FilterSet::default();

    if let Some(search) = present(search) {
        set.contact.insert("%NAME".into(), Value::String(search.into()));
    }

    let Some(raw) = present(filters_json) else {
        return set;
    };
    let input: FilterInput = match serde_json::from_str(raw) {
        Ok(input) => input,
        Err(e) => {
            warn!(error = %e, "ignoring malformed filters parameter");
            return set;
        }
    };

    if let Some(province) = present(input.province.as_deref()) {
        set.contact
            .insert(FIELD_ADDRESS.into(), Value::String(province.into()));
    }
    if let Some(phone) = present(input.phone.as_deref()) {
        set.contact
            .insert("PHONE".into(), Value::String(format_phone(phone)));
    }
    if let Some(email) = present(input.email.as_deref()) {
        set.contact
            .insert("EMAIL".into(), Value::String(email.into()));
    }
    if let Some(bank_name) = present(input.bank_name.as_deref()) {
        if bank_name != "all" {
            set.bank_detail
                .insert("RQ_BANK_NAME".into(), Value::String(bank_name.into()));
            set.has_bank_detail = true;
        }
    }
    if let Some(account_number) = present(input.account_number.as_deref()) {
        set.bank_detail
            .insert("%RQ_ACC_NUM".into(), Value::String(account_number.into()));
        set.has_bank_detail = true;
    }

    set
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
