//! Record name validation for security and filesystem compatibility.

use std::collections::HashSet;

/// Record name validation errors with helpful messages
#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("name is empty")]
    Empty,

    #[error("name is too long (maximum {max} characters)")]
    TooLong { max: usize },

    #[error("name contains whitespace")]
    Whitespace,

    #[error("name contains path separators (/ or \\)")]
    PathTraversal,

    #[error("name contains control characters")]
    ControlChars,

    #[error("name is a reserved system name")]
    Reserved,
}

/// Hard cap on record name length. Names become filenames, so this also
/// bounds the encoded filename length.
pub const MAX_NAME_LEN: usize = 48;

/// Validate a record name. Names double as command arguments and filename
/// stems, so whitespace and separators are rejected outright.
pub fn validate_record_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(NameError::TooLong { max: MAX_NAME_LEN });
    }
    if name.chars().any(char::is_whitespace) {
        return Err(NameError::Whitespace);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(NameError::PathTraversal);
    }
    if name.chars().any(char::is_control) {
        return Err(NameError::ControlChars);
    }
    if reserved_names().contains(name.to_ascii_lowercase().as_str()) {
        return Err(NameError::Reserved);
    }
    Ok(())
}

/// Generate a safe filename stem from a record name using percent encoding.
/// Keeps Windows servers from being blown up by CONs or NULs.
pub fn safe_filename(name: &str) -> String {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    utf8_percent_encode(name, NON_ALPHANUMERIC).to_string()
}

/// Reserved names that would collide with platform device files.
fn reserved_names() -> HashSet<&'static str> {
    [
        "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7",
        "com8", "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
    ]
    .into_iter()
    .collect()
}
