//! Phone prefix transforms between local and international form
//!
//! Vietnamese numbers travel in two equivalent spellings: local `0…` on the
//! client side, international `+84…` inside the CRM. Exactly one anchored
//! leading-prefix rewrite is applied per direction. The parsing is anchored
//! on purpose: a first-occurrence substring replace would corrupt numbers
//! with an interior zero before the match point.

/// Local `0XXXXXXXXX` → international `+84XXXXXXXXX`. Applied before every
/// CRM write. Numbers without the local prefix pass through untouched.
pub fn format_phone(phone: &str) -> String {
    match phone.strip_prefix('0') {
        Some(rest) => format!("+84{rest}"),
        None => phone.to_string(),
    }
}

/// International `+84XXXXXXXXX` → local `0XXXXXXXXX`. Applied on every CRM
/// read. Numbers without the international prefix pass through untouched.
pub fn normalize_phone(phone: &str) -> String {
    match phone.strip_prefix("+84") {
        Some(rest) => format!("0{rest}"),
        None => phone.to_string(),
    }
}
