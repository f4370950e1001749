//! Combination of many administrator records into enforced values
//!
//! Every function here is a pure function of the records it is handed. The
//! caller decides the scope: a profile group for password dimensions, one
//! user for device toggles, the owner user for the global proxy.

use core_types::AdminIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::quality::{PasswordComposition, PasswordQuality};
use crate::record::{ActiveAdminRecord, GlobalProxy, KeyguardFeatures, PasswordLimit, TimeLimit};

/// Who currently drives the global proxy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyResolution {
    #[default]
    Unset,
    Claimed {
        admin: AdminIdentity,
        proxy: GlobalProxy,
    },
    /// More than one administrator claims the proxy, in registration order
    Conflict(Vec<AdminIdentity>),
}

impl ProxyResolution {
    /// Proxy to enforce; contested claims enforce none until resolved
    pub fn effective(&self) -> Option<GlobalProxy> {
        match self {
            ProxyResolution::Claimed { proxy, .. } => Some(proxy.clone()),
            ProxyResolution::Unset | ProxyResolution::Conflict(_) => None,
        }
    }
}

/// First password requirement a composition fails to meet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordShortfall {
    #[error("password quality {actual} below required {required}")]
    Quality {
        required: PasswordQuality,
        actual: PasswordQuality,
    },
    #[error("password {} {actual} below required {required}", .limit.name())]
    Count {
        limit: PasswordLimit,
        required: u32,
        actual: u32,
    },
}

/// Enforced value of every dimension over one set of records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatePolicy {
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
}

/// Combines every dimension over `admins`
pub fn aggregate<'a, I>(admins: I) -> AggregatePolicy
where
    I: IntoIterator<Item = &'a ActiveAdminRecord>,
    I::IntoIter: Clone,
{
    let admins = admins.into_iter();
    AggregatePolicy {
        password_quality: password_quality(admins.clone()),
        minimum_password_length: strictest(admins.clone(), PasswordLimit::MinimumLength),
        password_history_length: strictest(admins.clone(), PasswordLimit::HistoryLength),
        minimum_upper_case: strictest(admins.clone(), PasswordLimit::MinimumUpperCase),
        minimum_lower_case: strictest(admins.clone(), PasswordLimit::MinimumLowerCase),
        minimum_letters: strictest(admins.clone(), PasswordLimit::MinimumLetters),
        minimum_numeric: strictest(admins.clone(), PasswordLimit::MinimumNumeric),
        minimum_symbols: strictest(admins.clone(), PasswordLimit::MinimumSymbols),
        minimum_non_letter: strictest(admins.clone(), PasswordLimit::MinimumNonLetter),
        maximum_failed_passwords_for_wipe: tightest(
            admins.clone(),
            TimeLimit::MaximumFailedPasswordsForWipe,
        ) as u32,
        maximum_time_to_lock_ms: tightest(admins.clone(), TimeLimit::MaximumTimeToLock),
        password_expiration_timeout_ms: tightest(
            admins.clone(),
            TimeLimit::PasswordExpirationTimeout,
        ),
        password_expiration_date_ms: tightest(admins.clone(), TimeLimit::PasswordExpirationDate),
        encryption_requested: admins.clone().any(|a| a.encryption_requested),
        camera_disabled: admins.clone().any(|a| a.camera_disabled),
        disabled_keyguard_features: keyguard_features(admins.clone()),
        disabled_account_types: account_types(admins),
    }
}

/// Strongest quality any administrator requires
pub fn password_quality<'a>(admins: impl IntoIterator<Item = &'a ActiveAdminRecord>) -> PasswordQuality {
    admins
        .into_iter()
        .map(|a| a.password_quality)
        .max()
        .unwrap_or_default()
}

/// Largest value of a strictest-wins dimension; zero when nobody sets it
pub fn strictest<'a>(
    admins: impl IntoIterator<Item = &'a ActiveAdminRecord>,
    limit: PasswordLimit,
) -> u32 {
    admins
        .into_iter()
        .map(|a| a.limit(limit))
        .max()
        .unwrap_or(0)
}

/// Smallest non-zero value of a tightest-wins dimension; zero when unset
pub fn tightest<'a>(
    admins: impl IntoIterator<Item = &'a ActiveAdminRecord>,
    limit: TimeLimit,
) -> u64 {
    admins
        .into_iter()
        .map(|a| a.time_limit(limit))
        .filter(|v| *v != 0)
        .min()
        .unwrap_or(0)
}

pub fn keyguard_features<'a>(
    admins: impl IntoIterator<Item = &'a ActiveAdminRecord>,
) -> KeyguardFeatures {
    admins
        .into_iter()
        .fold(KeyguardFeatures::NONE, |acc, a| {
            acc.union(a.disabled_keyguard_features)
        })
}

pub fn account_types<'a>(
    admins: impl IntoIterator<Item = &'a ActiveAdminRecord>,
) -> BTreeSet<String> {
    admins
        .into_iter()
        .flat_map(|a| a.disabled_account_types.iter().cloned())
        .collect()
}

/// Resolves the global proxy claimants, in the order given
pub fn global_proxy<'a>(admins: impl IntoIterator<Item = &'a ActiveAdminRecord>) -> ProxyResolution {
    let claimants: Vec<&ActiveAdminRecord> = admins
        .into_iter()
        .filter(|a| a.specifies_global_proxy())
        .collect();
    match claimants.as_slice() {
        [] => ProxyResolution::Unset,
        [only] => match &only.global_proxy {
            Some(proxy) => ProxyResolution::Claimed {
                admin: only.identity.clone(),
                proxy: proxy.clone(),
            },
            None => ProxyResolution::Unset,
        },
        many => ProxyResolution::Conflict(many.iter().map(|a| a.identity.clone()).collect()),
    }
}

impl AggregatePolicy {
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

    /// Checks the last reported active password against these requirements
    ///
    /// Character classes only matter when the active password is `Complex`.
    pub fn check_active(&self, active: &PasswordComposition) -> Result<(), PasswordShortfall> {
        if active.quality < self.password_quality {
            return Err(PasswordShortfall::Quality {
                required: self.password_quality,
                actual: active.quality,
            });
        }
        self.check_count(PasswordLimit::MinimumLength, active.length)?;
        if active.quality != PasswordQuality::Complex {
            return Ok(());
        }
        self.check_classes(active)
    }

    /// Checks a candidate password and returns the quality to record for it
    ///
    /// A measured password never reaches `Complex`, so a `Complex` requirement
    /// is met through the character class counts instead.
    pub fn check_candidate(
        &self,
        candidate: &PasswordComposition,
    ) -> Result<PasswordQuality, PasswordShortfall> {
        let required = self.password_quality;
        if required != PasswordQuality::Unspecified
            && candidate.quality < required
            && required != PasswordQuality::Complex
        {
            return Err(PasswordShortfall::Quality {
                required,
                actual: candidate.quality,
            });
        }
        let quality = candidate.quality.max(required);
        self.check_count(PasswordLimit::MinimumLength, candidate.length)?;
        if quality == PasswordQuality::Complex {
            self.check_classes(candidate)?;
        }
        Ok(quality)
    }

    fn check_classes(&self, c: &PasswordComposition) -> Result<(), PasswordShortfall> {
        self.check_count(PasswordLimit::MinimumLetters, c.letters)?;
        self.check_count(PasswordLimit::MinimumUpperCase, c.upper_case)?;
        self.check_count(PasswordLimit::MinimumLowerCase, c.lower_case)?;
        self.check_count(PasswordLimit::MinimumNumeric, c.numeric)?;
        self.check_count(PasswordLimit::MinimumSymbols, c.symbols)?;
        self.check_count(PasswordLimit::MinimumNonLetter, c.non_letter)
    }

    fn check_count(&self, limit: PasswordLimit, actual: u32) -> Result<(), PasswordShortfall> {
        let required = self.limit(limit);
        if actual < required {
            Err(PasswordShortfall::Count {
                limit,
                required,
                actual,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::PolicyCapabilities;

    fn admin(name: &str) -> ActiveAdminRecord {
        ActiveAdminRecord::new(AdminIdentity::new("pkg", name), PolicyCapabilities::all())
    }

    fn with_length(name: &str, len: u32) -> ActiveAdminRecord {
        let mut a = admin(name);
        a.minimum_password_length = len;
        a
    }

    fn with_lock(name: &str, ms: u64) -> ActiveAdminRecord {
        let mut a = admin(name);
        a.maximum_time_to_lock_ms = ms;
        a
    }

    #[test]
    fn test_strictest_wins() {
        let admins = [with_length("a", 4), with_length("b", 8), with_length("c", 0)];
        assert_eq!(strictest(&admins, PasswordLimit::MinimumLength), 8);
    }

    #[test]
    fn test_strictest_all_zero() {
        let admins = [with_length("a", 0), with_length("b", 0)];
        assert_eq!(strictest(&admins, PasswordLimit::MinimumLength), 0);
        assert_eq!(strictest(&Vec::new(), PasswordLimit::MinimumLetters), 0);
    }

    #[test]
    fn test_tightest_nonzero_wins() {
        let admins = [with_lock("a", 0), with_lock("b", 30_000), with_lock("c", 15_000)];
        assert_eq!(tightest(&admins, TimeLimit::MaximumTimeToLock), 15_000);
    }

    #[test]
    fn test_tightest_all_zero() {
        let admins = [with_lock("a", 0), with_lock("b", 0)];
        assert_eq!(tightest(&admins, TimeLimit::MaximumTimeToLock), 0);
    }

    #[test]
    fn test_or_and_union() {
        let mut a = admin("a");
        a.camera_disabled = true;
        a.disabled_keyguard_features = KeyguardFeatures::WIDGETS;
        a.disabled_account_types.insert("com.mail".to_string());
        let mut b = admin("b");
        b.encryption_requested = true;
        b.disabled_keyguard_features = KeyguardFeatures::TRUST_AGENTS;
        b.disabled_account_types.insert("com.chat".to_string());

        let agg = aggregate(&[a, b]);
        assert!(agg.camera_disabled);
        assert!(agg.encryption_requested);
        assert_eq!(
            agg.disabled_keyguard_features,
            KeyguardFeatures::WIDGETS.union(KeyguardFeatures::TRUST_AGENTS)
        );
        assert_eq!(agg.disabled_account_types.len(), 2);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let mut b = with_length("b", 9);
        b.password_quality = PasswordQuality::Numeric;
        b.maximum_failed_passwords_for_wipe = 5;
        let admins = vec![with_length("a", 6), b];
        assert_eq!(aggregate(&admins), aggregate(&admins));
        assert_eq!(aggregate(&admins).maximum_failed_passwords_for_wipe, 5);
        assert_eq!(aggregate(&admins).password_quality, PasswordQuality::Numeric);
    }

    #[test]
    fn test_global_proxy_resolution() {
        let mut a = admin("a");
        a.global_proxy = Some(GlobalProxy::new("proxy:8080"));
        let b = admin("b");
        assert_eq!(
            global_proxy(&[a.clone(), b.clone()]),
            ProxyResolution::Claimed {
                admin: a.identity.clone(),
                proxy: GlobalProxy::new("proxy:8080"),
            }
        );
        assert_eq!(global_proxy(&[b.clone()]), ProxyResolution::Unset);

        let mut c = admin("c");
        c.global_proxy = Some(GlobalProxy::new("other:1"));
        let admins = [a.clone(), b, c.clone()];
        let res = global_proxy(&admins);
        assert_eq!(
            res,
            ProxyResolution::Conflict(vec![a.identity.clone(), c.identity.clone()])
        );
        assert_eq!(res.effective(), None);
        assert_eq!(
            global_proxy(&[a]).effective(),
            Some(GlobalProxy::new("proxy:8080"))
        );
    }

    #[test]
    fn test_check_active_complex() {
        let mut a = admin("a");
        a.password_quality = PasswordQuality::Complex;
        a.minimum_password_length = 6;
        a.minimum_symbols = 2;
        let agg = aggregate(&[a]);

        let mut active = PasswordComposition::measure("abc12!x");
        active.quality = PasswordQuality::Complex;
        assert_eq!(
            agg.check_active(&active),
            Err(PasswordShortfall::Count {
                limit: PasswordLimit::MinimumSymbols,
                required: 2,
                actual: 1,
            })
        );
        let mut strong = PasswordComposition::measure("abc1!!x");
        strong.quality = PasswordQuality::Complex;
        assert_eq!(agg.check_active(&strong), Ok(()));
    }

    #[test]
    fn test_check_active_quality_and_length() {
        let mut a = with_length("a", 6);
        a.password_quality = PasswordQuality::Numeric;
        let agg = aggregate(&[a]);
        assert!(matches!(
            agg.check_active(&PasswordComposition::default()),
            Err(PasswordShortfall::Quality { .. })
        ));
        assert!(agg.check_active(&PasswordComposition::measure("1234")).is_err());
        assert!(agg.check_active(&PasswordComposition::measure("123456")).is_ok());
    }

    #[test]
    fn test_check_candidate() {
        let mut a = with_length("a", 4);
        a.password_quality = PasswordQuality::Alphanumeric;
        let agg = aggregate(&[a]);
        assert!(agg.check_candidate(&PasswordComposition::measure("12345")).is_err());
        assert_eq!(
            agg.check_candidate(&PasswordComposition::measure("ab12")),
            Ok(PasswordQuality::Alphanumeric)
        );

        let mut c = admin("c");
        c.password_quality = PasswordQuality::Complex;
        let agg = aggregate(&[c]);
        assert_eq!(
            agg.check_candidate(&PasswordComposition::measure("a1!")),
            Ok(PasswordQuality::Complex)
        );
        assert!(agg.check_candidate(&PasswordComposition::measure("abc")).is_err());
    }
}
