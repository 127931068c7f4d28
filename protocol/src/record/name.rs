//! Name syntax.
//!
//! A name is 3 to 63 characters of `[a-z0-9-]`, starting with a letter or
//! digit and not ending in a hyphen. Lookups fold their input first, so
//! `" Alice "` resolves `alice`; records must carry the folded form.

use thiserror::Error;

use crate::config::{MAX_NAME_LENGTH, MIN_NAME_LENGTH};
use crate::error::ErrorClass;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("name is {0} characters; the minimum is {MIN_NAME_LENGTH}")]
    TooShort(usize),

    #[error("name is {0} characters; the maximum is {MAX_NAME_LENGTH}")]
    TooLong(usize),

    #[error("invalid character {0:?} in name")]
    InvalidCharacter(char),

    #[error("name must start with a letter or digit")]
    LeadingHyphen,

    #[error("name must not end with a hyphen")]
    TrailingHyphen,
}

impl NameError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::MalformedInput
    }
}

/// Canonical lookup form: trimmed and ASCII-lowercased.
pub fn fold_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Check `name` against the registration rules. No folding is applied.
pub fn validate_name(name: &str) -> Result<(), NameError> {
    let len = name.chars().count();
    if len < MIN_NAME_LENGTH {
        return Err(NameError::TooShort(len));
    }
    if len > MAX_NAME_LENGTH {
        return Err(NameError::TooLong(len));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(NameError::InvalidCharacter(c));
    }
    if name.starts_with('-') {
        return Err(NameError::LeadingHyphen);
    }
    if name.ends_with('-') {
        return Err(NameError::TrailingHyphen);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        for name in ["abc", "alice", "0xdead", "my-name-2", &"a".repeat(63)] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!(validate_name("ab"), Err(NameError::TooShort(2)));
        assert_eq!(validate_name(&"a".repeat(64)), Err(NameError::TooLong(64)));
        assert_eq!(validate_name("Alice"), Err(NameError::InvalidCharacter('A')));
        assert_eq!(validate_name("al_ce"), Err(NameError::InvalidCharacter('_')));
        assert_eq!(validate_name("-alice"), Err(NameError::LeadingHyphen));
        assert_eq!(validate_name("alice-"), Err(NameError::TrailingHyphen));
        assert!(validate_name("alïce").is_err());
    }

    #[test]
    fn folding_trims_and_lowercases() {
        assert_eq!(fold_name("  Alice "), "alice");
        assert!(validate_name(&fold_name(" BOB ")).is_ok());
    }
}
