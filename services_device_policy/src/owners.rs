//! Device owner, profile owners and provisioning latches
//!
//! Owner state is one durable record. Each mutation builds the next state,
//! writes it, and only then replaces the in-memory copy, so a failed write
//! leaves nothing changed.

use core_types::UserId;
use services_storage::{RecordKey, RecordStore};
use tracing::info;

use crate::codec::{decode_owners, encode_owners};
use crate::error::{PolicyError, PolicyResult};
use crate::persistence::{parse, render};
use crate::snapshot::{OwnerEntry, OwnerState};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerHierarchy {
    state: OwnerState,
}

impl OwnerHierarchy {
    /// Loads owner state; an absent record is an empty state
    pub fn load(store: &dyn RecordStore) -> PolicyResult<Self> {
        match store.read(RecordKey::Owners) {
            Ok(bytes) => Ok(Self {
                state: decode_owners(&parse(&bytes)?)?,
            }),
            Err(e) if e.is_not_found() => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn state(&self) -> &OwnerState {
        &self.state
    }

    pub fn device_owner(&self) -> Option<&OwnerEntry> {
        self.state.device_owner.as_ref()
    }

    pub fn profile_owner(&self, user: UserId) -> Option<&OwnerEntry> {
        self.state.profile_owners.get(&user)
    }

    pub fn is_device_owner(&self, package: &str) -> bool {
        self.device_owner().is_some_and(|o| o.package == package)
    }

    pub fn is_profile_owner(&self, package: &str, user: UserId) -> bool {
        self.profile_owner(user).is_some_and(|o| o.package == package)
    }

    pub fn is_provisioned(&self) -> bool {
        self.state.provisioned
    }

    pub fn is_user_setup_complete(&self, user: UserId) -> bool {
        self.state.setup_complete_users.contains(&user)
    }

    pub fn set_device_owner(
        &mut self,
        store: &dyn RecordStore,
        package: &str,
        name: &str,
    ) -> PolicyResult<()> {
        if self.state.provisioned {
            return Err(PolicyError::AlreadyProvisioned);
        }
        if let Some(existing) = &self.state.device_owner {
            return Err(PolicyError::DeviceOwnerAlreadySet(existing.package.clone()));
        }
        self.commit(store, |s| {
            s.device_owner = Some(OwnerEntry::new(package, name));
        })?;
        info!(package, "device owner set");
        Ok(())
    }

    pub fn set_profile_owner(
        &mut self,
        store: &dyn RecordStore,
        user: UserId,
        package: &str,
        name: &str,
    ) -> PolicyResult<()> {
        if self.is_user_setup_complete(user) {
            return Err(PolicyError::UserSetupComplete(user));
        }
        if self.state.profile_owners.contains_key(&user) {
            return Err(PolicyError::ProfileOwnerAlreadySet(user));
        }
        self.commit(store, |s| {
            s.profile_owners.insert(user, OwnerEntry::new(package, name));
        })?;
        info!(%user, package, "profile owner set");
        Ok(())
    }

    /// Clears the device owner; only the current device owner may ask
    pub fn clear_device_owner(&mut self, store: &dyn RecordStore, package: &str) -> PolicyResult<()> {
        if !self.is_device_owner(package) {
            return Err(PolicyError::NotDeviceOwner(package.to_string()));
        }
        self.commit(store, |s| s.device_owner = None)?;
        info!(package, "device owner cleared");
        Ok(())
    }

    pub fn mark_provisioned(&mut self, store: &dyn RecordStore) -> PolicyResult<()> {
        if self.state.provisioned {
            return Ok(());
        }
        self.commit(store, |s| s.provisioned = true)
    }

    pub fn mark_user_setup_complete(
        &mut self,
        store: &dyn RecordStore,
        user: UserId,
    ) -> PolicyResult<()> {
        if self.is_user_setup_complete(user) {
            return Ok(());
        }
        self.commit(store, |s| {
            s.setup_complete_users.insert(user);
        })
    }

    /// Forgets owner data of a removed user
    pub fn remove_user(&mut self, store: &dyn RecordStore, user: UserId) -> PolicyResult<bool> {
        if !self.state.profile_owners.contains_key(&user)
            && !self.state.setup_complete_users.contains(&user)
        {
            return Ok(false);
        }
        self.commit(store, |s| {
            s.profile_owners.remove(&user);
            s.setup_complete_users.remove(&user);
        })?;
        Ok(true)
    }

    /// Users that have owner data recorded
    pub fn known_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .state
            .profile_owners
            .keys()
            .chain(self.state.setup_complete_users.iter())
            .copied()
            .collect();
        users.sort();
        users.dedup();
        users
    }

    fn commit(&mut self, store: &dyn RecordStore, f: impl FnOnce(&mut OwnerState)) -> PolicyResult<()> {
        let mut next = self.state.clone();
        f(&mut next);
        let bytes = render(&encode_owners(&next))?;
        store.write(RecordKey::Owners, &bytes)?;
        self.state = next;
        Ok(())
    }
}
