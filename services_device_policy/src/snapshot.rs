//! Durable per-user and device-global policy state

use core_types::{AdminIdentity, UserId};
use policy::{PasswordComposition, PasswordQuality};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::registry::AdminRegistry;

/// Everything persisted for one user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPolicySnapshot {
    pub admins: AdminRegistry,
    pub failed_password_attempts: u32,
    /// Last reported state of the active password
    pub active_password: PasswordComposition,
    /// Admin that set the current password and asked for it to be kept
    pub password_owner: Option<AdminIdentity>,
    pub lock_task_packages: Vec<String>,
    pub restrictions_provider: Option<AdminIdentity>,
    /// Screen lock limit last handed to enforcement; never written to the
    /// journal, so a reload pushes the value again
    pub last_max_time_to_lock: Option<Option<u64>>,
}

impl UserPolicySnapshot {
    pub fn new(user: UserId) -> Self {
        Self {
            admins: AdminRegistry::new(user),
            ..Self::default()
        }
    }

    pub fn user(&self) -> UserId {
        self.admins.user()
    }

    /// Clears the password owner when it is no longer a registered admin
    pub fn validate_password_owner(&mut self) -> bool {
        match &self.password_owner {
            Some(owner) if !self.admins.contains(owner) => {
                info!(user = %self.user(), %owner, "password owner no longer active, clearing");
                self.password_owner = None;
                true
            }
            _ => false,
        }
    }

    /// Resets the stored active password if it claims more than the
    /// credential subsystem measured
    pub fn validate_active_password(&mut self, measured: PasswordQuality) -> bool {
        if measured >= self.active_password.quality {
            return false;
        }
        warn!(
            user = %self.user(),
            stored = %self.active_password.quality,
            %measured,
            "active password quality does not match actual quality, resetting"
        );
        self.active_password = PasswordComposition::default();
        true
    }

    /// Replaces the lock task list, dropping duplicates but keeping order
    pub fn set_lock_task_packages(&mut self, packages: impl IntoIterator<Item = String>) {
        let mut seen = BTreeSet::new();
        self.lock_task_packages = packages
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();
    }

    pub fn is_lock_task_permitted(&self, package: &str) -> bool {
        self.lock_task_packages.iter().any(|p| p == package)
    }
}

/// A device or profile owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerEntry {
    pub package: String,
    /// Human-readable owner name
    pub name: String,
}

impl OwnerEntry {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }
}

/// Device-global ownership and provisioning state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerState {
    pub device_owner: Option<OwnerEntry>,
    pub profile_owners: BTreeMap<UserId, OwnerEntry>,
    /// Set once the device has been provisioned; never cleared
    pub provisioned: bool,
    /// Users whose setup has completed; entries are never cleared while the
    /// user exists
    pub setup_complete_users: BTreeSet<UserId>,
}
