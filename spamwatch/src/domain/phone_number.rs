//! Phone number value object.

use serde::{Deserialize, Serialize};

use crate::Error;

const MIN_DIGITS: usize = 7;
const MAX_DIGITS: usize = 15;

/// A normalized phone number: digits only, with an optional leading `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalize and validate a user-supplied number.
    ///
    /// Spaces, dashes, dots and parentheses are stripped. Any other character,
    /// or a digit count outside 7..=15, is rejected.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, Error> {
        let raw = raw.as_ref().trim();
        let (plus, rest) = match raw.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let mut digits = String::with_capacity(rest.len());
        for c in rest.chars() {
            match c {
                '0'..='9' => digits.push(c),
                ' ' | '-' | '.' | '(' | ')' => {}
                other => {
                    return Err(Error::validation(format!(
                        "invalid character '{}' in phone number '{}'",
                        other, raw
                    )));
                }
            }
        }

        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            return Err(Error::validation(format!(
                "phone number '{}' must have {}-{} digits",
                raw, MIN_DIGITS, MAX_DIGITS
            )));
        }

        Ok(Self(if plus { format!("+{}", digits) } else { digits }))
    }

    /// Wrap an already-normalized number (e.g. loaded from the database).
    pub fn from_trusted(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The number without a leading `+`, as dialed into an emulator.
    pub fn digits(&self) -> &str {
        self.0.trim_start_matches('+')
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PhoneNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
