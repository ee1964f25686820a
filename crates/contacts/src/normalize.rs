//! Bidirectional contact field mapping
//!
//! Pure, total functions: every mapped server key corresponds to exactly one
//! normalized attribute and vice versa, absent fields become `None`, nothing
//! here performs I/O or fails. Phone-number spelling is NOT touched here —
//! that is the orchestrator's concern, applied per direction of travel.

use crate::types::{Contact, ContactRecord};

/// Flat CRM record → normalized contact. Requisites are attached separately
/// by the orchestrator; this mapping starts them empty.
pub fn to_normalized(record: ContactRecord) -> Contact {
    Contact {
        id: record.id,
        name: record.name,
        phone: record.phone,
        email: record.email,
        web: record.web,
        address: record.address,
        bank_name: record.bank_name,
        account_number: record.account_number,
        requisites: Vec::new(),
    }
}

/// Normalized contact → flat CRM record. Requisites do not travel on the
/// contact entity and are dropped here.
pub fn to_server_fields(contact: &Contact) -> ContactRecord {
    ContactRecord {
        id: contact.id.clone(),
        name: contact.name.clone(),
        phone: contact.phone.clone(),
        email: contact.email.clone(),
        web: contact.web.clone(),
        address: contact.address.clone(),
        bank_name: contact.bank_name.clone(),
        account_number: contact.account_number.clone(),
    }
}
