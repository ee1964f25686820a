//! Contact orchestration across the three CRM entities
//!
//! Composes the normalizer and the REST gateway into the four inbound
//! operations. The CRM has no transactions spanning contact, requisite and
//! bank detail, so:
//!
//! - create is a two-step saga: contact first, then requisite + bank detail,
//!   with a compensating contact delete when the second step fails
//! - list joins requisites/bank details client-side; with a bank-detail
//!   filter the reported total degrades to the post-filter count
//! - update treats the requisite side as best-effort and reports a
//!   structured partial result instead of failing the whole operation

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{error, warn};

use bitrix_rest::{Paged, RestClient, Result};

use crate::filter::build_filters;
use crate::normalize::{to_normalized, to_server_fields};
use crate::phone::{format_phone, normalize_phone};
use crate::types::{
    BankDetail, CONTACT_ENTITY_TYPE_ID, Contact, ContactRecord, FIELD_ADDRESS, MultiField,
    REQUISITE_PRESET_ID, Requisite,
};

const CONTACT_SELECT: &[&str] = &["ID", "NAME", FIELD_ADDRESS, "EMAIL", "WEB", "PHONE"];
const REQUISITE_SELECT: &[&str] = &["ID", "ENTITY_TYPE_ID", "ENTITY_ID", "PRESET_ID"];
const BANK_DETAIL_SELECT: &[&str] = &["ID", "ENTITY_ID", "NAME", "RQ_BANK_NAME", "RQ_ACC_NUM"];

/// Pagination echo: the CRM pages at a fixed size of 50, `start` is the
/// offset the caller supplied, `total` the CRM's count (or the post-filter
/// count on the bank-detail join path).
#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub start: u64,
}

/// Result of a list operation.
#[derive(Debug)]
pub struct ContactList {
    pub contacts: Vec<Contact>,
    pub pagination: Pagination,
}

/// Result of a create: the new contact plus the requisite chain when bank
/// data was supplied.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub contact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requisite_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_detail_id: Option<String>,
}

/// Structured partial result of an update. The contact side is fatal when it
/// fails; the requisite side only downgrades the outcome and leaves a
/// warning.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub contact_updated: bool,
    pub requisite_updated: bool,
    pub warnings: Vec<String>,
}

/// Orchestrator over one CRM portal.
pub struct ContactService {
    client: Arc<RestClient>,
}

impl ContactService {
    pub fn new(client: Arc<RestClient>) -> Self {
        Self { client }
    }

    /// List contacts with the optional search/filter set applied.
    ///
    /// Contact-level filters go straight to `crm.contact.list`. Bank-detail
    /// filters force the join: requisites are fetched for the candidate
    /// contacts, bank details are fetched filtered, requisites without a
    /// matching detail drop out, and contacts with no surviving requisite
    /// disappear from the page (total recomputed accordingly).
    pub async fn list(
        &self,
        search: Option<&str>,
        filters_json: Option<&str>,
        start: u64,
    ) -> Result<ContactList> {
        let filters = build_filters(search, filters_json);

        let page: Paged<ContactRecord> = self
            .client
            .contact_list(Value::Object(filters.contact), CONTACT_SELECT, start)
            .await?;
        let contact_ids: Vec<String> = page.items.iter().filter_map(|c| c.id.clone()).collect();

        if contact_ids.is_empty() || !filters.has_bank_detail {
            let requisites = self.fetch_requisites(&contact_ids, Map::new()).await;
            return Ok(ContactList {
                contacts: assemble_contacts(page.items, requisites),
                pagination: Pagination {
                    total: page.total,
                    start,
                },
            });
        }

        let requisites = self.fetch_requisites(&contact_ids, filters.bank_detail).await;
        let surviving: Vec<ContactRecord> = page
            .items
            .into_iter()
            .filter(|c| {
                c.id.as_deref()
                    .is_some_and(|id| requisites.contains_key(id))
            })
            .collect();
        let total = surviving.len() as u64;

        Ok(ContactList {
            contacts: assemble_contacts(surviving, requisites),
            pagination: Pagination { total, start },
        })
    }

    /// Create a contact, and — only when bank data is supplied — its
    /// requisite and bank detail keyed by the new contact ID.
    ///
    /// If the requisite/bank-detail step fails, the just-created contact is
    /// deleted (compensating step) and the step's error propagates. A
    /// requisite already created when the bank detail fails is left behind;
    /// the CRM tolerates requisites without bank details.
    pub async fn create(&self, contact: &Contact) -> Result<CreateOutcome> {
        let mut fields = write_fields(contact);
        fields.id = None;
        let contact_id = self.client.contact_add(&fields).await?;

        let Some(bank) = requested_bank_detail(contact) else {
            return Ok(CreateOutcome {
                contact_id,
                requisite_id: None,
                bank_detail_id: None,
            });
        };

        match self.create_requisite_with_bank_detail(&contact_id, bank).await {
            Ok((requisite_id, bank_detail_id)) => Ok(CreateOutcome {
                contact_id,
                requisite_id: Some(requisite_id),
                bank_detail_id: Some(bank_detail_id),
            }),
            Err(e) => {
                self.rollback_contact(&contact_id).await;
                Err(e)
            }
        }
    }

    /// Update the contact record; independently sync the bank detail when
    /// bank data is supplied.
    ///
    /// The requisite side never fails the operation: its errors are logged
    /// and surfaced as warnings on the structured outcome.
    pub async fn update(&self, id: &str, contact: &Contact) -> Result<UpdateOutcome> {
        let mut fields = write_fields(contact);
        fields.id = Some(id.to_string());
        self.client.contact_update(id, &fields).await?;

        let mut outcome = UpdateOutcome {
            contact_updated: true,
            ..Default::default()
        };

        let Some(bank) = requested_bank_detail(contact) else {
            return Ok(outcome);
        };

        match self.sync_bank_detail(id, bank).await {
            Ok(true) => outcome.requisite_updated = true,
            // No requisite on the contact: nothing to attach bank data to
            Ok(false) => {}
            Err(e) => {
                warn!(contact_id = id, error = %e, "requisite update failed, contact update stands");
                outcome
                    .warnings
                    .push(format!("requisite update failed: {e}"));
            }
        }

        Ok(outcome)
    }

    /// Delete the contact record only. Requisites and bank details are left
    /// to the CRM's own cascade behavior.
    pub async fn delete(&self, id: &str) -> Result<Value> {
        self.client.contact_delete(id).await
    }

    /// Fetch requisites for the given contacts and group them by contact ID,
    /// attaching each requisite's bank detail.
    ///
    /// With a non-empty `bank_filter` the bank-detail query is filtered and
    /// requisites lacking a matching detail are dropped. Lookup failures on
    /// either entity degrade to "no requisites"; the contact page itself
    /// still renders.
    async fn fetch_requisites(
        &self,
        contact_ids: &[String],
        bank_filter: Map<String, Value>,
    ) -> HashMap<String, Vec<Requisite>> {
        if contact_ids.is_empty() {
            return HashMap::new();
        }
        let filtering = !bank_filter.is_empty();

        let requisites: Vec<Requisite> = match self
            .client
            .requisite_list(
                json!({
                    "ENTITY_TYPE_ID": CONTACT_ENTITY_TYPE_ID,
                    "ENTITY_ID": contact_ids,
                }),
                REQUISITE_SELECT,
            )
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "requisite lookup failed, listing contacts without requisites");
                return HashMap::new();
            }
        };
        if requisites.is_empty() {
            return HashMap::new();
        }

        let requisite_ids: Vec<&str> = requisites.iter().map(|r| r.id.as_str()).collect();
        let mut filter = bank_filter;
        filter.insert("ENTITY_ID".into(), json!(requisite_ids));

        let bank_details: Vec<BankDetail> = match self
            .client
            .bank_detail_list(Value::Object(filter), BANK_DETAIL_SELECT)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "bank detail lookup failed");
                Vec::new()
            }
        };

        let mut by_requisite: HashMap<String, BankDetail> = HashMap::new();
        for detail in bank_details {
            by_requisite.insert(detail.entity_id.clone(), detail);
        }

        let mut by_contact: HashMap<String, Vec<Requisite>> = HashMap::new();
        for mut requisite in requisites {
            let attached = by_requisite.get(&requisite.id).cloned();
            if filtering && attached.is_none() {
                continue;
            }
            requisite.bank_detail = attached;
            by_contact
                .entry(requisite.entity_id.clone())
                .or_default()
                .push(requisite);
        }
        by_contact
    }

    async fn create_requisite_with_bank_detail(
        &self,
        contact_id: &str,
        bank: &BankDetail,
    ) -> Result<(String, String)> {
        let requisite_id = self
            .client
            .requisite_add(&json!({
                "ENTITY_TYPE_ID": CONTACT_ENTITY_TYPE_ID,
                "ENTITY_ID": contact_id,
                "PRESET_ID": REQUISITE_PRESET_ID,
                "NAME": format!("Requisite for contact {contact_id}"),
            }))
            .await?;

        let bank_detail_id = self
            .client
            .bank_detail_add(&json!({
                "ENTITY_ID": requisite_id,
                "NAME": format!("Bank Detail for contact - {contact_id}"),
                "RQ_BANK_NAME": bank.rq_bank_name,
                "RQ_ACC_NUM": bank.rq_acc_num,
            }))
            .await?;

        Ok((requisite_id, bank_detail_id))
    }

    async fn rollback_contact(&self, contact_id: &str) {
        if let Err(e) = self.client.contact_delete(contact_id).await {
            error!(contact_id, error = %e, "failed to delete contact while rolling back create");
        }
    }

    /// Update the first bank detail under the contact's first requisite, or
    /// create one if the requisite has none. Returns false when the contact
    /// has no requisite at all.
    async fn sync_bank_detail(&self, contact_id: &str, bank: &BankDetail) -> Result<bool> {
        let requisites: Vec<Requisite> = self
            .client
            .requisite_list(
                json!({
                    "ENTITY_TYPE_ID": CONTACT_ENTITY_TYPE_ID,
                    "ENTITY_ID": contact_id,
                }),
                REQUISITE_SELECT,
            )
            .await?;
        let Some(requisite) = requisites.first() else {
            return Ok(false);
        };

        let existing: Vec<BankDetail> = self
            .client
            .bank_detail_list(json!({ "ENTITY_ID": requisite.id }), BANK_DETAIL_SELECT)
            .await?;

        match existing.first() {
            Some(detail) => {
                self.client
                    .bank_detail_update(
                        &detail.id,
                        &json!({
                            "RQ_BANK_NAME": bank.rq_bank_name,
                            "RQ_ACC_NUM": bank.rq_acc_num,
                        }),
                    )
                    .await?;
            }
            None => {
                self.client
                    .bank_detail_add(&json!({
                        "ENTITY_ID": requisite.id,
                        "NAME": format!("Bank Detail for contact - {contact_id}"),
                        "RQ_BANK_NAME": bank.rq_bank_name,
                        "RQ_ACC_NUM": bank.rq_acc_num,
                    }))
                    .await?;
            }
        }
        Ok(true)
    }
}

/// Bank detail the caller is asking for, if any: the first requisite's
/// detail, counted only when it carries a bank name or an account number.
fn requested_bank_detail(contact: &Contact) -> Option<&BankDetail> {
    contact
        .requisites
        .first()
        .and_then(|r| r.bank_detail.as_ref())
        .filter(|bd| !bd.rq_bank_name.is_empty() || !bd.rq_acc_num.is_empty())
}

/// Contact fields as written to the CRM: first channel entry only, phone in
/// international form, bank data stripped (it travels on the bank detail).
fn write_fields(contact: &Contact) -> ContactRecord {
    let mut fields = to_server_fields(contact);
    fields.bank_name = None;
    fields.account_number = None;
    fields.phone = contact
        .phone
        .first()
        .map(|first| MultiField {
            value: format_phone(&first.value),
            ..first.clone()
        })
        .into_iter()
        .collect();
    fields.email.truncate(1);
    fields.web.truncate(1);
    fields
}

/// Left-join the grouped requisites onto the contact page, normalizing each
/// record (first channel entries only, phone back in local form).
fn assemble_contacts(
    records: Vec<ContactRecord>,
    mut requisites: HashMap<String, Vec<Requisite>>,
) -> Vec<Contact> {
    records
        .into_iter()
        .map(|mut record| {
            record.phone = record
                .phone
                .first()
                .map(|first| MultiField {
                    value: normalize_phone(&first.value),
                    ..first.clone()
                })
                .into_iter()
                .collect();
            record.email.truncate(1);
            record.web.truncate(1);

            let attached = record
                .id
                .as_deref()
                .and_then(|id| requisites.remove(id))
                .unwrap_or_default();

            let mut contact = to_normalized(record);
            contact.requisites = attached;
            contact
        })
        .collect()
}
