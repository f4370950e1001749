//! Password quality classes and character composition

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors for policy values that fall outside their domain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyValueError {
    #[error("unknown password quality code: {0:#x}")]
    UnknownQuality(u32),
}

/// Ordered password strength classes
///
/// The derived ordering is the strength ordering, so aggregation can use
/// `max` directly. Codes are the stable persisted values.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PasswordQuality {
    #[default]
    Unspecified,
    BiometricWeak,
    Something,
    Numeric,
    Alphabetic,
    Alphanumeric,
    Complex,
}

impl PasswordQuality {
    pub const ALL: [PasswordQuality; 7] = [
        PasswordQuality::Unspecified,
        PasswordQuality::BiometricWeak,
        PasswordQuality::Something,
        PasswordQuality::Numeric,
        PasswordQuality::Alphabetic,
        PasswordQuality::Alphanumeric,
        PasswordQuality::Complex,
    ];

    pub fn code(&self) -> u32 {
        match self {
            PasswordQuality::Unspecified => 0x0,
            PasswordQuality::BiometricWeak => 0x8000,
            PasswordQuality::Something => 0x10000,
            PasswordQuality::Numeric => 0x20000,
            PasswordQuality::Alphabetic => 0x40000,
            PasswordQuality::Alphanumeric => 0x50000,
            PasswordQuality::Complex => 0x60000,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, PolicyValueError> {
        Self::ALL
            .iter()
            .copied()
            .find(|q| q.code() == code)
            .ok_or(PolicyValueError::UnknownQuality(code))
    }
}

impl fmt::Display for PasswordQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PasswordQuality::Unspecified => "unspecified",
            PasswordQuality::BiometricWeak => "biometric-weak",
            PasswordQuality::Something => "something",
            PasswordQuality::Numeric => "numeric",
            PasswordQuality::Alphabetic => "alphabetic",
            PasswordQuality::Alphanumeric => "alphanumeric",
            PasswordQuality::Complex => "complex",
        };
        f.write_str(name)
    }
}

/// Character class make-up of a password
///
/// Used both for the last-reported state of the active password and for the
/// measurement of a candidate password.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordComposition {
    pub quality: PasswordQuality,
    pub length: u32,
    pub upper_case: u32,
    pub lower_case: u32,
    pub letters: u32,
    pub numeric: u32,
    pub symbols: u32,
    pub non_letter: u32,
}

impl PasswordComposition {
    /// Measures a candidate password
    ///
    /// The measured quality is never `Complex`; complexity is a requirement
    /// checked against the counts, not a property of the text itself.
    pub fn measure(password: &str) -> Self {
        let mut c = PasswordComposition::default();
        for ch in password.chars() {
            c.length += 1;
            if ch.is_alphabetic() {
                c.letters += 1;
                if ch.is_uppercase() {
                    c.upper_case += 1;
                } else if ch.is_lowercase() {
                    c.lower_case += 1;
                }
            } else if ch.is_ascii_digit() {
                c.numeric += 1;
                c.non_letter += 1;
            } else {
                c.symbols += 1;
                c.non_letter += 1;
            }
        }
        let has_digit = c.numeric > 0;
        let has_non_digit = c.length > c.numeric;
        c.quality = match (has_digit, has_non_digit) {
            (true, true) => PasswordQuality::Alphanumeric,
            (false, true) => PasswordQuality::Alphabetic,
            (true, false) => PasswordQuality::Numeric,
            (false, false) => PasswordQuality::Unspecified,
        };
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_ordering_matches_codes() {
        for pair in PasswordQuality::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].code() < pair[1].code());
        }
    }

    #[test]
    fn test_quality_from_code() {
        assert_eq!(
            PasswordQuality::from_code(0x50000),
            Ok(PasswordQuality::Alphanumeric)
        );
        assert_eq!(
            PasswordQuality::from_code(0x1234),
            Err(PolicyValueError::UnknownQuality(0x1234))
        );
    }

    #[test]
    fn test_measure_alphanumeric() {
        let c = PasswordComposition::measure("Abc12!");
        assert_eq!(c.quality, PasswordQuality::Alphanumeric);
        assert_eq!(c.length, 6);
        assert_eq!(c.letters, 3);
        assert_eq!(c.upper_case, 1);
        assert_eq!(c.lower_case, 2);
        assert_eq!(c.numeric, 2);
        assert_eq!(c.symbols, 1);
        assert_eq!(c.non_letter, 3);
    }

    #[test]
    fn test_measure_classes() {
        assert_eq!(PasswordComposition::measure("1234").quality, PasswordQuality::Numeric);
        assert_eq!(PasswordComposition::measure("abcd").quality, PasswordQuality::Alphabetic);
        assert_eq!(PasswordComposition::measure("").quality, PasswordQuality::Unspecified);
    }
}
