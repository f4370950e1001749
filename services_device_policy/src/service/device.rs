//! Device toggles, global settings, lock task mode and ownership

use core_types::{AdminIdentity, PolicyCapability, UserId};
use policy::aggregate::global_proxy;
use policy::{GlobalProxy, KeyguardFeatures, ProxyResolution};
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::{check_identity, Effect, PolicyService};
use crate::collaborators::AdminEvent;
use crate::error::{PolicyError, PolicyResult};
use crate::snapshot::OwnerEntry;

impl PolicyService {
    pub fn set_maximum_time_to_lock(
        &self,
        user: UserId,
        who: &AdminIdentity,
        max_ms: u64,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            txn.commit_admin(user, who, PolicyCapability::ForceLock, |r| {
                r.maximum_time_to_lock_ms = max_ms
            })?;
            txn.push_enforcement(user)
        })
    }

    /// Zero means no limit
    pub fn maximum_time_to_lock(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<u64> {
        self.run(|txn| match who {
            Some(who) => Ok(txn
                .record(user, who)?
                .map_or(0, |r| r.maximum_time_to_lock_ms)),
            None => Ok(txn.group_aggregate(user)?.maximum_time_to_lock_ms),
        })
    }

    pub fn set_camera_disabled(
        &self,
        user: UserId,
        who: &AdminIdentity,
        disabled: bool,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            txn.commit_admin(user, who, PolicyCapability::DisableCamera, |r| {
                r.camera_disabled = disabled
            })?;
            txn.push_enforcement(user)
        })
    }

    pub fn camera_disabled(&self, user: UserId, who: Option<&AdminIdentity>) -> PolicyResult<bool> {
        self.run(|txn| match who {
            Some(who) => Ok(txn.record(user, who)?.is_some_and(|r| r.camera_disabled)),
            None => Ok(txn.user_aggregate(user)?.camera_disabled),
        })
    }

    pub fn set_keyguard_disabled_features(
        &self,
        user: UserId,
        who: &AdminIdentity,
        features: KeyguardFeatures,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            txn.commit_admin(user, who, PolicyCapability::DisableKeyguardFeatures, |r| {
                r.disabled_keyguard_features = features
            })
        })
    }

    pub fn keyguard_disabled_features(
        &self,
        user: UserId,
        who: Option<&AdminIdentity>,
    ) -> PolicyResult<KeyguardFeatures> {
        self.run(|txn| match who {
            Some(who) => Ok(txn
                .record(user, who)?
                .map_or(KeyguardFeatures::NONE, |r| r.disabled_keyguard_features)),
            None => Ok(txn.user_aggregate(user)?.disabled_keyguard_features),
        })
    }

    /// Blocks or allows account management for one account type
    pub fn set_account_management_disabled(
        &self,
        user: UserId,
        who: &AdminIdentity,
        account_type: &str,
        disabled: bool,
    ) -> PolicyResult<()> {
        if account_type.is_empty() {
            return Err(PolicyError::InvalidValue("empty account type".to_string()));
        }
        self.run(|txn| {
            txn.commit_admin(user, who, PolicyCapability::ProfileOwner, |r| {
                if disabled {
                    r.disabled_account_types.insert(account_type.to_string());
                } else {
                    r.disabled_account_types.remove(account_type);
                }
            })
        })
    }

    pub fn account_types_with_management_disabled(
        &self,
        user: UserId,
    ) -> PolicyResult<BTreeSet<String>> {
        self.run(|txn| Ok(txn.user_aggregate(user)?.disabled_account_types))
    }

    /// Requests storage encryption; returns the new device-wide request
    pub fn set_storage_encryption(
        &self,
        user: UserId,
        who: &AdminIdentity,
        requested: bool,
    ) -> PolicyResult<bool> {
        if !user.is_owner() {
            warn!(%user, admin = %who, "storage encryption is only honoured for the owner user");
            return Err(PolicyError::NotOwnerUser(user));
        }
        self.run(|txn| {
            txn.commit_admin(user, who, PolicyCapability::EncryptedStorage, |r| {
                r.encryption_requested = requested
            })?;
            txn.push_device_state()?;
            Ok(txn.user_aggregate(user)?.encryption_requested)
        })
    }

    pub fn storage_encryption(&self, user: UserId, who: Option<&AdminIdentity>) -> PolicyResult<bool> {
        self.run(|txn| match who {
            Some(who) => Ok(txn.record(user, who)?.is_some_and(|r| r.encryption_requested)),
            None if user.is_owner() => Ok(txn.user_aggregate(user)?.encryption_requested),
            None => Ok(false),
        })
    }

    /// Claims, changes or releases the global proxy
    ///
    /// Only one administrator of the owner user may hold it at a time.
    pub fn set_global_proxy(
        &self,
        user: UserId,
        who: &AdminIdentity,
        proxy: Option<GlobalProxy>,
    ) -> PolicyResult<()> {
        if !user.is_owner() {
            return Err(PolicyError::NotOwnerUser(user));
        }
        if proxy.as_ref().is_some_and(|p| p.spec.is_empty()) {
            return Err(PolicyError::InvalidValue("empty proxy spec".to_string()));
        }
        self.run(|txn| {
            txn.check_caller(user, who, PolicyCapability::SetsGlobalProxy)?;
            if proxy.is_some() {
                let holder = txn
                    .snapshot(user)?
                    .admins
                    .records()
                    .find(|r| r.specifies_global_proxy() && &r.identity != who)
                    .map(|r| r.identity.clone());
                if let Some(holder) = holder {
                    return Err(PolicyError::ConflictingGlobalProxy(holder));
                }
            }
            txn.commit_admin(user, who, PolicyCapability::SetsGlobalProxy, |r| {
                r.global_proxy = proxy
            })?;
            info!(admin = %who, "global proxy updated");
            txn.push_device_state()
        })
    }

    /// Administrator currently holding the global proxy
    pub fn global_proxy_admin(&self, user: UserId) -> PolicyResult<Option<AdminIdentity>> {
        if !user.is_owner() {
            return Ok(None);
        }
        self.run(|txn| match global_proxy(txn.snapshot(user)?.admins.records()) {
            ProxyResolution::Unset => Ok(None),
            ProxyResolution::Claimed { admin, .. } => Ok(Some(admin)),
            ProxyResolution::Conflict(claimants) => {
                Err(PolicyError::InconsistentGlobalProxy(claimants))
            }
        })
    }

    pub fn lock_now(&self, user: UserId, who: &AdminIdentity) -> PolicyResult<()> {
        self.run(|txn| {
            txn.check_caller(user, who, PolicyCapability::ForceLock)?;
            txn.effects.push(Effect::LockNow(user));
            Ok(())
        })
    }

    pub fn wipe_data(&self, user: UserId, who: &AdminIdentity) -> PolicyResult<()> {
        self.run(|txn| {
            txn.check_caller(user, who, PolicyCapability::WipeData)?;
            warn!(%user, admin = %who, "wipe requested by admin");
            txn.effects.push(Effect::Wipe(user));
            Ok(())
        })
    }

    // ----- lock task mode -----

    /// Replaces the packages allowed to enter lock task mode
    pub fn set_lock_task_packages(
        &self,
        user: UserId,
        who: &AdminIdentity,
        packages: Vec<String>,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            txn.check_caller(user, who, PolicyCapability::ProfileOwner)?;
            txn.commit(user, |snap| {
                snap.set_lock_task_packages(packages);
                Ok(())
            })
        })
    }

    pub fn lock_task_packages(&self, user: UserId, who: &AdminIdentity) -> PolicyResult<Vec<String>> {
        self.run(|txn| {
            txn.check_caller(user, who, PolicyCapability::ProfileOwner)?;
            Ok(txn.snapshot(user)?.lock_task_packages.clone())
        })
    }

    pub fn is_lock_task_permitted(&self, user: UserId, package: &str) -> PolicyResult<bool> {
        self.run(|txn| Ok(txn.snapshot(user)?.is_lock_task_permitted(package)))
    }

    /// Tells the device and profile owner admins of `user` about lock task
    /// mode entering or leaving
    pub fn notify_lock_task_mode_changed(
        &self,
        user: UserId,
        enabled: bool,
        package: &str,
    ) -> PolicyResult<()> {
        self.run(|txn| {
            txn.snapshot(user)?;
            let state = &*txn.state;
            let targets: Vec<AdminIdentity> = state
                .users
                .get(&user)
                .into_iter()
                .flat_map(|snap| snap.admins.records())
                .map(|r| &r.identity)
                .filter(|admin| {
                    state.owners.is_device_owner(admin.namespace())
                        || state.owners.is_profile_owner(admin.namespace(), user)
                })
                .cloned()
                .collect();
            let extras = vec![
                ("enabled".to_string(), enabled.to_string()),
                ("package".to_string(), package.to_string()),
            ];
            for admin in targets {
                txn.effects.push(Effect::Notify {
                    user,
                    admin,
                    event: AdminEvent::LockTaskChanged,
                    extras: extras.clone(),
                });
            }
            Ok(())
        })
    }

    // ----- restrictions provider -----

    pub fn set_application_restrictions_provider(
        &self,
        user: UserId,
        who: &AdminIdentity,
        provider: Option<AdminIdentity>,
    ) -> PolicyResult<()> {
        if let Some(provider) = &provider {
            check_identity(provider)?;
        }
        self.run(|txn| {
            txn.check_caller(user, who, PolicyCapability::ProfileOwner)?;
            txn.commit(user, |snap| {
                snap.restrictions_provider = provider;
                Ok(())
            })
        })
    }

    pub fn application_restrictions_provider(
        &self,
        user: UserId,
    ) -> PolicyResult<Option<AdminIdentity>> {
        self.run(|txn| Ok(txn.snapshot(user)?.restrictions_provider.clone()))
    }

    // ----- ownership -----

    /// Makes `package` the device owner; only possible before provisioning
    pub fn set_device_owner(&self, package: &str, name: &str) -> PolicyResult<()> {
        if !self
            .collaborators
            .liveness
            .is_package_installed(UserId::OWNER, package)
        {
            return Err(PolicyError::PackageNotInstalled(package.to_string()));
        }
        self.run(|txn| {
            let service = txn.service;
            txn.state
                .owners
                .set_device_owner(service.store.as_ref(), package, name)
        })
    }

    pub fn clear_device_owner(&self, package: &str) -> PolicyResult<()> {
        self.run(|txn| {
            let service = txn.service;
            txn.state
                .owners
                .clear_device_owner(service.store.as_ref(), package)
        })
    }

    pub fn device_owner(&self) -> Option<OwnerEntry> {
        self.lock_state().owners.device_owner().cloned()
    }

    pub fn is_device_owner(&self, package: &str) -> bool {
        self.lock_state().owners.is_device_owner(package)
    }

    /// Makes `package` the profile owner of `user`; only during setup
    pub fn set_profile_owner(&self, user: UserId, package: &str, name: &str) -> PolicyResult<()> {
        if !self.collaborators.liveness.is_package_installed(user, package) {
            return Err(PolicyError::PackageNotInstalled(package.to_string()));
        }
        self.run(|txn| {
            let service = txn.service;
            txn.state
                .owners
                .set_profile_owner(service.store.as_ref(), user, package, name)
        })
    }

    pub fn profile_owner(&self, user: UserId) -> Option<OwnerEntry> {
        self.lock_state().owners.profile_owner(user).cloned()
    }

    pub fn mark_provisioned(&self) -> PolicyResult<()> {
        self.run(|txn| {
            let service = txn.service;
            txn.state.owners.mark_provisioned(service.store.as_ref())
        })
    }

    pub fn is_provisioned(&self) -> bool {
        self.lock_state().owners.is_provisioned()
    }

    pub fn mark_user_setup_complete(&self, user: UserId) -> PolicyResult<()> {
        self.run(|txn| {
            let service = txn.service;
            txn.state
                .owners
                .mark_user_setup_complete(service.store.as_ref(), user)
        })
    }
}
