//! Complaint numbering.
//!
//! `serial_no` is one global zero-padded counter. `ticket_number` is the
//! upper-cased first three characters of the area name followed by a
//! zero-padded counter per prefix. Callers must hold the store's sequence lock
//! between reading the previous maximum and inserting the new row.

/// Next global serial after `current_max` (the largest serial seen, numerically).
pub fn next_serial_no(current_max: Option<i64>) -> String {
    format!("{:03}", current_max.unwrap_or(0) + 1)
}

pub fn ticket_prefix(area_name: &str) -> String {
    area_name.chars().take(3).collect::<String>().to_uppercase()
}

/// Whether `ticket` was issued under `prefix`: the prefix followed by exactly
/// three digits.
pub fn issued_under(ticket: &str, prefix: &str) -> bool {
    match ticket.strip_prefix(prefix) {
        Some(rest) => rest.len() == 3 && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// `LLLDDD`: three ASCII capitals then three digits.
fn is_well_formed(ticket: &str) -> bool {
    let bytes = ticket.as_bytes();
    bytes.len() == 6
        && bytes[..3].iter().all(|b| b.is_ascii_uppercase())
        && bytes[3..].iter().all(|b| b.is_ascii_digit())
}

/// Next ticket under `prefix` given the greatest ticket already issued under it.
///
/// The counter restarts at 1 when there is no previous ticket or the previous
/// one is not of the `LLLDDD` form.
pub fn next_ticket_number(prefix: &str, last_ticket: Option<&str>) -> String {
    let counter = match last_ticket {
        Some(last) if is_well_formed(last) => last[3..].parse::<u32>().unwrap_or(0) + 1,
        _ => 1,
    };
    format!("{}{:03}", prefix, counter)
}

/// Numeric value of a stored serial, ignoring anything unparsable.
pub fn serial_value(serial_no: &str) -> Option<i64> {
    serial_no.parse::<i64>().ok()
}
