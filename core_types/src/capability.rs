//! Administrator policy capabilities
//!
//! An administrator declares, at registration time, which policy families it
//! intends to control. Every setter checks the caller's declared set before
//! touching state.
//!
//! ## Design Principles
//!
//! 1. **Declared, not inferred**: A capability is held only if it was listed
//!    at registration.
//! 2. **Immutable**: The set never changes while the administrator stays
//!    registered.
//! 3. **Stable tags**: Each capability has a persisted tag string.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One policy family an administrator may control
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PolicyCapability {
    LimitPassword,
    WatchLogin,
    ResetPassword,
    ForceLock,
    WipeData,
    SetsGlobalProxy,
    ExpirePassword,
    EncryptedStorage,
    DisableCamera,
    DisableKeyguardFeatures,
    DeviceOwner,
    ProfileOwner,
}

impl PolicyCapability {
    pub const ALL: [PolicyCapability; 12] = [
        PolicyCapability::LimitPassword,
        PolicyCapability::WatchLogin,
        PolicyCapability::ResetPassword,
        PolicyCapability::ForceLock,
        PolicyCapability::WipeData,
        PolicyCapability::SetsGlobalProxy,
        PolicyCapability::ExpirePassword,
        PolicyCapability::EncryptedStorage,
        PolicyCapability::DisableCamera,
        PolicyCapability::DisableKeyguardFeatures,
        PolicyCapability::DeviceOwner,
        PolicyCapability::ProfileOwner,
    ];

    /// Persisted tag of this capability
    pub fn tag(&self) -> &'static str {
        match self {
            PolicyCapability::LimitPassword => "limit-password",
            PolicyCapability::WatchLogin => "watch-login",
            PolicyCapability::ResetPassword => "reset-password",
            PolicyCapability::ForceLock => "force-lock",
            PolicyCapability::WipeData => "wipe-data",
            PolicyCapability::SetsGlobalProxy => "sets-global-proxy",
            PolicyCapability::ExpirePassword => "expire-password",
            PolicyCapability::EncryptedStorage => "encrypted-storage",
            PolicyCapability::DisableCamera => "disable-camera",
            PolicyCapability::DisableKeyguardFeatures => "disable-keyguard-features",
            PolicyCapability::DeviceOwner => "device-owner",
            PolicyCapability::ProfileOwner => "profile-owner",
        }
    }

    /// Capabilities that come from owner status rather than declaration
    pub fn is_owner_derived(&self) -> bool {
        matches!(
            self,
            PolicyCapability::DeviceOwner | PolicyCapability::ProfileOwner
        )
    }
}

impl fmt::Display for PolicyCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("unknown policy capability tag: {0}")]
    UnknownTag(String),
}

impl FromStr for PolicyCapability {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|cap| cap.tag() == s)
            .ok_or_else(|| CapabilityError::UnknownTag(s.to_string()))
    }
}

/// Declared capability set of one administrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCapabilities {
    caps: BTreeSet<PolicyCapability>,
}

impl PolicyCapabilities {
    /// Creates an empty capability set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability (builder pattern)
    pub fn with(mut self, cap: PolicyCapability) -> Self {
        self.caps.insert(cap);
        self
    }

    /// Every capability
    pub fn all() -> Self {
        PolicyCapability::ALL.iter().copied().collect()
    }

    pub fn contains(&self, cap: PolicyCapability) -> bool {
        self.caps.contains(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = PolicyCapability> + '_ {
        self.caps.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// Parses a list of persisted tags
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Result<Self, CapabilityError> {
        tags.into_iter().map(str::parse).collect()
    }

    /// Persisted tags in stable order
    pub fn tags(&self) -> Vec<&'static str> {
        self.caps.iter().map(PolicyCapability::tag).collect()
    }
}

impl FromIterator<PolicyCapability> for PolicyCapabilities {
    fn from_iter<I: IntoIterator<Item = PolicyCapability>>(iter: I) -> Self {
        Self {
            caps: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for PolicyCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.tags().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for cap in PolicyCapability::ALL {
            assert_eq!(cap.tag().parse::<PolicyCapability>().unwrap(), cap);
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(
            "fly".parse::<PolicyCapability>(),
            Err(CapabilityError::UnknownTag("fly".to_string()))
        );
    }

    #[test]
    fn test_capabilities_builder() {
        let caps = PolicyCapabilities::new()
            .with(PolicyCapability::LimitPassword)
            .with(PolicyCapability::WipeData)
            .with(PolicyCapability::LimitPassword);
        assert_eq!(caps.len(), 2);
        assert!(caps.contains(PolicyCapability::WipeData));
        assert!(!caps.contains(PolicyCapability::WatchLogin));
    }

    #[test]
    fn test_from_tags() {
        let caps = PolicyCapabilities::from_tags(["watch-login", "force-lock"]).unwrap();
        assert_eq!(caps.tags(), vec!["watch-login", "force-lock"]);
        assert!(PolicyCapabilities::from_tags(["watch-login", "bogus"]).is_err());
    }

    #[test]
    fn test_owner_derived() {
        assert!(PolicyCapability::DeviceOwner.is_owner_derived());
        assert!(!PolicyCapability::WipeData.is_owner_derived());
    }
}
