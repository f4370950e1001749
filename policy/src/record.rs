//! Per-administrator policy records

use core_types::{AdminIdentity, PolicyCapabilities, PolicyCapability};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::quality::PasswordQuality;

/// Bit set of keyguard features an administrator disables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyguardFeatures(u32);

impl KeyguardFeatures {
    pub const NONE: KeyguardFeatures = KeyguardFeatures(0);
    pub const WIDGETS: KeyguardFeatures = KeyguardFeatures(1 << 0);
    pub const SECURE_CAMERA: KeyguardFeatures = KeyguardFeatures(1 << 1);
    pub const SECURE_NOTIFICATIONS: KeyguardFeatures = KeyguardFeatures(1 << 2);
    pub const UNREDACTED_NOTIFICATIONS: KeyguardFeatures = KeyguardFeatures(1 << 3);
    pub const TRUST_AGENTS: KeyguardFeatures = KeyguardFeatures(1 << 4);
    pub const ALL: KeyguardFeatures = KeyguardFeatures(0x7fff_ffff);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: KeyguardFeatures) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: KeyguardFeatures) -> KeyguardFeatures {
        KeyguardFeatures(self.0 | other.0)
    }
}

impl fmt::Display for KeyguardFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Proxy configuration claimed by an administrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalProxy {
    pub spec: String,
    pub exclusion_list: Option<String>,
}

impl GlobalProxy {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            exclusion_list: None,
        }
    }

    pub fn with_exclusion_list(mut self, list: impl Into<String>) -> Self {
        self.exclusion_list = Some(list.into());
        self
    }
}

/// Password dimensions that aggregate strictest-wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PasswordLimit {
    MinimumLength,
    HistoryLength,
    MinimumUpperCase,
    MinimumLowerCase,
    MinimumLetters,
    MinimumNumeric,
    MinimumSymbols,
    MinimumNonLetter,
}

impl PasswordLimit {
    pub const ALL: [PasswordLimit; 8] = [
        PasswordLimit::MinimumLength,
        PasswordLimit::HistoryLength,
        PasswordLimit::MinimumUpperCase,
        PasswordLimit::MinimumLowerCase,
        PasswordLimit::MinimumLetters,
        PasswordLimit::MinimumNumeric,
        PasswordLimit::MinimumSymbols,
        PasswordLimit::MinimumNonLetter,
    ];

    /// Value a freshly registered administrator starts with
    pub fn default_value(&self) -> u32 {
        match self {
            PasswordLimit::MinimumLetters
            | PasswordLimit::MinimumNumeric
            | PasswordLimit::MinimumSymbols => 1,
            _ => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PasswordLimit::MinimumLength => "minimum length",
            PasswordLimit::HistoryLength => "history length",
            PasswordLimit::MinimumUpperCase => "minimum upper case",
            PasswordLimit::MinimumLowerCase => "minimum lower case",
            PasswordLimit::MinimumLetters => "minimum letters",
            PasswordLimit::MinimumNumeric => "minimum numeric",
            PasswordLimit::MinimumSymbols => "minimum symbols",
            PasswordLimit::MinimumNonLetter => "minimum non-letter",
        }
    }
}

/// Dimensions that aggregate tightest-nonzero-wins
///
/// Zero means "no limit from this administrator" for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeLimit {
    MaximumFailedPasswordsForWipe,
    MaximumTimeToLock,
    PasswordExpirationTimeout,
    PasswordExpirationDate,
}

/// One administrator's asserted policy values
///
/// Fields hold the raw value the administrator set. Zero or `false` means the
/// administrator does not constrain that dimension, except for the letter,
/// numeric and symbol minimums which start at one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAdminRecord {
    pub identity: AdminIdentity,
    pub capabilities: PolicyCapabilities,
    pub password_quality: PasswordQuality,
    pub minimum_password_length: u32,
    pub password_history_length: u32,
    pub minimum_upper_case: u32,
    pub minimum_lower_case: u32,
    pub minimum_letters: u32,
    pub minimum_numeric: u32,
    pub minimum_symbols: u32,
    pub minimum_non_letter: u32,
    pub maximum_failed_passwords_for_wipe: u32,
    pub maximum_time_to_lock_ms: u64,
    pub password_expiration_timeout_ms: u64,
    pub password_expiration_date_ms: u64,
    pub encryption_requested: bool,
    pub camera_disabled: bool,
    pub disabled_keyguard_features: KeyguardFeatures,
    pub disabled_account_types: BTreeSet<String>,
    pub global_proxy: Option<GlobalProxy>,
}

impl ActiveAdminRecord {
    /// Creates a record with every dimension at its default
    pub fn new(identity: AdminIdentity, capabilities: PolicyCapabilities) -> Self {
        Self {
            identity,
            capabilities,
            password_quality: PasswordQuality::Unspecified,
            minimum_password_length: 0,
            password_history_length: 0,
            minimum_upper_case: 0,
            minimum_lower_case: 0,
            minimum_letters: PasswordLimit::MinimumLetters.default_value(),
            minimum_numeric: PasswordLimit::MinimumNumeric.default_value(),
            minimum_symbols: PasswordLimit::MinimumSymbols.default_value(),
            minimum_non_letter: 0,
            maximum_failed_passwords_for_wipe: 0,
            maximum_time_to_lock_ms: 0,
            password_expiration_timeout_ms: 0,
            password_expiration_date_ms: 0,
            encryption_requested: false,
            camera_disabled: false,
            disabled_keyguard_features: KeyguardFeatures::NONE,
            disabled_account_types: BTreeSet::new(),
            global_proxy: None,
        }
    }

    /// Checks a declared capability
    pub fn uses(&self, cap: PolicyCapability) -> bool {
        self.capabilities.contains(cap)
    }

    pub fn specifies_global_proxy(&self) -> bool {
        self.global_proxy.is_some()
    }

    pub fn limit(&self, limit: PasswordLimit) -> u32 {
        match limit {
            PasswordLimit::MinimumLength => self.minimum_password_length,
            PasswordLimit::HistoryLength => self.password_history_length,
            PasswordLimit::MinimumUpperCase => self.minimum_upper_case,
            PasswordLimit::MinimumLowerCase => self.minimum_lower_case,
            PasswordLimit::MinimumLetters => self.minimum_letters,
            PasswordLimit::MinimumNumeric => self.minimum_numeric,
            PasswordLimit::MinimumSymbols => self.minimum_symbols,
            PasswordLimit::MinimumNonLetter => self.minimum_non_letter,
        }
    }

    pub fn set_limit(&mut self, limit: PasswordLimit, value: u32) {
        let slot = match limit {
            PasswordLimit::MinimumLength => &mut self.minimum_password_length,
            PasswordLimit::HistoryLength => &mut self.password_history_length,
            PasswordLimit::MinimumUpperCase => &mut self.minimum_upper_case,
            PasswordLimit::MinimumLowerCase => &mut self.minimum_lower_case,
            PasswordLimit::MinimumLetters => &mut self.minimum_letters,
            PasswordLimit::MinimumNumeric => &mut self.minimum_numeric,
            PasswordLimit::MinimumSymbols => &mut self.minimum_symbols,
            PasswordLimit::MinimumNonLetter => &mut self.minimum_non_letter,
        };
        *slot = value;
    }

    pub fn time_limit(&self, limit: TimeLimit) -> u64 {
        match limit {
            TimeLimit::MaximumFailedPasswordsForWipe => {
                u64::from(self.maximum_failed_passwords_for_wipe)
            }
            TimeLimit::MaximumTimeToLock => self.maximum_time_to_lock_ms,
            TimeLimit::PasswordExpirationTimeout => self.password_expiration_timeout_ms,
            TimeLimit::PasswordExpirationDate => self.password_expiration_date_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ActiveAdminRecord {
        ActiveAdminRecord::new(
            AdminIdentity::new("pkg", "Admin"),
            PolicyCapabilities::new().with(PolicyCapability::LimitPassword),
        )
    }

    #[test]
    fn test_defaults() {
        let r = record();
        assert_eq!(r.password_quality, PasswordQuality::Unspecified);
        for limit in PasswordLimit::ALL {
            assert_eq!(r.limit(limit), limit.default_value());
        }
        assert!(!r.specifies_global_proxy());
        assert!(r.disabled_keyguard_features.is_empty());
    }

    #[test]
    fn test_set_limit() {
        let mut r = record();
        r.set_limit(PasswordLimit::MinimumSymbols, 4);
        assert_eq!(r.minimum_symbols, 4);
        assert_eq!(r.limit(PasswordLimit::MinimumSymbols), 4);
    }

    #[test]
    fn test_uses() {
        let r = record();
        assert!(r.uses(PolicyCapability::LimitPassword));
        assert!(!r.uses(PolicyCapability::WipeData));
    }

    #[test]
    fn test_keyguard_union() {
        let f = KeyguardFeatures::WIDGETS.union(KeyguardFeatures::SECURE_CAMERA);
        assert!(f.contains(KeyguardFeatures::WIDGETS));
        assert!(f.contains(KeyguardFeatures::SECURE_CAMERA));
        assert!(!f.contains(KeyguardFeatures::TRUST_AGENTS));
        assert_eq!(f.bits(), 0b11);
    }
}
