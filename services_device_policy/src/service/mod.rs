//! The device policy service
//!
//! `PolicyService` owns every user snapshot and the owner state behind one
//! lock. Each public operation runs as a transaction: it takes the lock,
//! loads what it needs, commits changed snapshots through the journal, and
//! queues the side effects. The lock is released before any effect reaches a
//! collaborator.

mod device;
mod effects;
mod password;

use core_types::{AdminIdentity, PolicyCapabilities, PolicyCapability, RemovalToken, UserId};
use lifecycle::{Timeout, WallTime};
use policy::aggregate::{aggregate, global_proxy};
use policy::{ActiveAdminRecord, AggregatePolicy, ProxyResolution};
use services_storage::{RecordKey, RecordStore};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::codec::{decode_snapshot, encode_snapshot};
use crate::collaborators::{AdminEvent, AlarmId, Collaborators, Delivery};
use crate::config::PolicyServiceConfig;
use crate::error::{PolicyError, PolicyResult};
use crate::owners::OwnerHierarchy;
use crate::persistence::{parse, render};
use crate::registry::AdminState;
use crate::snapshot::UserPolicySnapshot;

pub(crate) use effects::{Effect, Effects};
pub use password::next_expiration_alarm;

/// Result of asking for an administrator's removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The administrator is gone
    Removed,
    /// The administrator was told and has yet to acknowledge
    Pending(RemovalToken),
}

#[derive(Debug, Default)]
struct ServiceState {
    users: BTreeMap<UserId, UserPolicySnapshot>,
    owners: OwnerHierarchy,
}

pub struct PolicyService {
    config: PolicyServiceConfig,
    store: Arc<dyn RecordStore>,
    collaborators: Collaborators,
    state: Mutex<ServiceState>,
}

impl PolicyService {
    /// Creates a service over `store`, loading the owner record
    ///
    /// User snapshots are loaded lazily on first use.
    pub fn new(
        config: PolicyServiceConfig,
        store: Arc<dyn RecordStore>,
        collaborators: Collaborators,
    ) -> PolicyResult<Self> {
        let owners = OwnerHierarchy::load(store.as_ref())?;
        info!(
            device_owner = owners.device_owner().map(|o| o.package.as_str()),
            provisioned = owners.is_provisioned(),
            "policy service started"
        );
        Ok(Self {
            config,
            store,
            collaborators,
            state: Mutex::new(ServiceState {
                users: BTreeMap::new(),
                owners,
            }),
        })
    }

    pub fn config(&self) -> &PolicyServiceConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs `f` under the state lock, then dispatches queued effects
    fn run<R>(&self, f: impl FnOnce(&mut Txn<'_>) -> PolicyResult<R>) -> PolicyResult<R> {
        let mut txn = Txn {
            service: self,
            state: self.lock_state(),
            effects: Effects::default(),
        };
        let result = f(&mut txn);
        txn.finish();
        result
    }

    fn read_snapshot(&self, user: UserId) -> PolicyResult<UserPolicySnapshot> {
        let mut snapshot = match self.store.read(RecordKey::User(user)) {
            Ok(bytes) => decode_snapshot(user, &parse(&bytes)?)?,
            Err(e) if e.is_not_found() => UserPolicySnapshot::new(user),
            Err(e) => return Err(e.into()),
        };
        snapshot.validate_active_password(self.collaborators.credentials.measured_quality(user));
        snapshot.validate_password_owner();
        debug!(%user, admins = snapshot.admins.len(), "policy snapshot loaded");
        Ok(snapshot)
    }

    // ----- administrator lifecycle -----

    /// Registers an administrator for `user` and tells it so
    pub fn set_active_admin(
        &self,
        user: UserId,
        identity: AdminIdentity,
        capabilities: PolicyCapabilities,
        refreshing: bool,
    ) -> PolicyResult<()> {
        check_identity(&identity)?;
        if !self.collaborators.liveness.is_installed(user, &identity) {
            return Err(PolicyError::NotInstalled {
                user,
                admin: identity,
            });
        }
        self.run(|txn| {
            txn.commit(user, |snap| {
                snap.admins
                    .register(identity.clone(), capabilities, refreshing)
                    .map(|_| ())
            })?;
            info!(%user, admin = %identity, refreshing, "admin activated");
            txn.effects.notify(user, identity, AdminEvent::Enabled);
            Ok(())
        })
    }

    /// First phase of removal: mark pending, then tell the administrator
    ///
    /// If the administrator handles the notification synchronously the
    /// removal completes before this returns.
    pub fn remove_active_admin(
        &self,
        user: UserId,
        identity: &AdminIdentity,
    ) -> PolicyResult<RemovalOutcome> {
        let (token, fresh) = self.run(|txn| {
            if txn.state.owners.is_device_owner(identity.namespace()) {
                return Err(PolicyError::DeviceOwnerNotRemovable(identity.clone()));
            }
            let deadline =
                Timeout::from_millis(self.config.removal_ack_timeout_ms).to_deadline(txn.now());
            let admins = &mut txn.snapshot_mut(user)?.admins;
            if let Some(pending) = admins.pending_removal(identity) {
                return Ok((pending.token, false));
            }
            Ok((admins.begin_removal(identity, deadline)?, true))
        })?;
        if !fresh {
            debug!(%user, admin = %identity, %token, "removal already pending");
            return Ok(RemovalOutcome::Pending(token));
        }

        match self
            .collaborators
            .transport
            .notify(user, identity, AdminEvent::Disabled, &[])
        {
            Delivery::Synchronous => {
                self.acknowledge_removal(token)?;
                Ok(RemovalOutcome::Removed)
            }
            Delivery::Deferred => Ok(RemovalOutcome::Pending(token)),
        }
    }

    /// Second phase of removal; returns the removed identity
    pub fn acknowledge_removal(&self, token: RemovalToken) -> PolicyResult<AdminIdentity> {
        self.run(|txn| txn.complete_removal(token))
            .map(|record| record.identity)
    }

    /// Forces every removal whose acknowledgement deadline has passed
    pub fn expire_pending_removals(&self) -> PolicyResult<Vec<AdminIdentity>> {
        self.run(|txn| {
            let now = txn.now();
            let overdue: Vec<RemovalToken> = txn
                .state
                .users
                .values()
                .flat_map(|snap| snap.admins.overdue_removals(now))
                .collect();
            let mut removed = Vec::new();
            for token in overdue {
                match txn.complete_removal(token) {
                    Ok(record) => {
                        warn!(admin = %record.identity, "removal not acknowledged in time, forced");
                        removed.push(record.identity);
                    }
                    Err(e) => warn!(%token, error = %e, "failed to force overdue removal"),
                }
            }
            Ok(removed)
        })
    }

    // ----- queries -----

    pub fn is_admin_active(&self, user: UserId, identity: &AdminIdentity) -> PolicyResult<bool> {
        self.run(|txn| Ok(txn.snapshot(user)?.admins.contains(identity)))
    }

    pub fn is_removing_admin(&self, user: UserId, identity: &AdminIdentity) -> PolicyResult<bool> {
        Ok(self.admin_state(user, identity)? == AdminState::PendingRemoval)
    }

    pub fn admin_state(&self, user: UserId, identity: &AdminIdentity) -> PolicyResult<AdminState> {
        self.run(|txn| Ok(txn.snapshot(user)?.admins.state_of(identity)))
    }

    /// Registered administrators of `user` in registration order
    pub fn active_admins(&self, user: UserId) -> PolicyResult<Vec<AdminIdentity>> {
        self.run(|txn| Ok(txn.snapshot(user)?.admins.identities()))
    }

    pub fn active_admin_record(
        &self,
        user: UserId,
        identity: &AdminIdentity,
    ) -> PolicyResult<Option<ActiveAdminRecord>> {
        self.run(|txn| Ok(txn.record(user, identity)?.cloned()))
    }

    pub fn package_has_active_admins(&self, user: UserId, package: &str) -> PolicyResult<bool> {
        self.run(|txn| {
            Ok(txn
                .snapshot(user)?
                .admins
                .records()
                .any(|r| r.identity.namespace() == package))
        })
    }

    /// Whether an active administrator holds `capability`
    pub fn has_granted_policy(
        &self,
        user: UserId,
        identity: &AdminIdentity,
        capability: PolicyCapability,
    ) -> PolicyResult<bool> {
        self.run(|txn| txn.granted(user, identity, capability))
    }

    // ----- user lifecycle -----

    /// Drops data of vanished users and pushes the owner user's policy
    pub fn system_ready(&self) -> PolicyResult<()> {
        self.clean_up_removed_users()?;
        self.run(|txn| {
            txn.push_enforcement(UserId::OWNER)?;
            txn.schedule_expiration_alarm(UserId::OWNER)
        })
    }

    /// Reloads `user` from the journal and prunes uninstalled administrators
    pub fn user_started(&self, user: UserId) -> PolicyResult<Vec<AdminIdentity>> {
        self.run(|txn| {
            txn.state.users.remove(&user);
            Ok(())
        })?;
        self.prune_for_package_change(user)
    }

    /// Removes administrators whose package is gone
    pub fn prune_for_package_change(&self, user: UserId) -> PolicyResult<Vec<AdminIdentity>> {
        let liveness = self.collaborators.liveness.clone();
        self.run(|txn| {
            let stale = txn
                .snapshot(user)?
                .admins
                .records()
                .any(|r| !liveness.is_installed(user, &r.identity));
            if !stale {
                return Ok(Vec::new());
            }
            let removed = txn
                .commit(user, |snap| {
                    let removed = snap.admins.prune(|admin| liveness.is_installed(user, admin));
                    snap.validate_password_owner();
                    Ok(removed)
                })
                .map_err(|e| {
                    warn!(%user, error = %e, "failed to persist pruned admins, will retry");
                    e
                })?;
            for record in &removed {
                info!(%user, admin = %record.identity, "admin package removed");
            }
            txn.push_enforcement(user)?;
            txn.schedule_expiration_alarm(user)?;
            Ok(removed.into_iter().map(|r| r.identity).collect())
        })
    }

    /// Deletes every trace of `user`; the owner user is never removed
    pub fn remove_user(&self, user: UserId) -> PolicyResult<()> {
        if user.is_owner() {
            warn!("refusing to remove the owner user's policy data");
            return Ok(());
        }
        self.run(|txn| txn.remove_user(user))
    }

    /// Removes data of users the profile directory no longer lists
    pub fn clean_up_removed_users(&self) -> PolicyResult<Vec<UserId>> {
        let existing: BTreeSet<UserId> = self
            .collaborators
            .profiles
            .existing_users()
            .into_iter()
            .collect();
        self.run(|txn| {
            let mut known: BTreeSet<UserId> = txn.state.users.keys().copied().collect();
            known.extend(txn.state.owners.known_users());
            let stale: Vec<UserId> = known
                .into_iter()
                .filter(|u| !u.is_owner() && !existing.contains(u))
                .collect();
            for user in &stale {
                txn.remove_user(*user)?;
            }
            Ok(stale)
        })
    }

    /// Human-readable state of every loaded user
    pub fn dump(&self) -> String {
        let state = self.lock_state();
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = write_dump(&state, &mut out);
        out
    }
}

/// One locked pass over the service state
struct Txn<'a> {
    service: &'a PolicyService,
    state: MutexGuard<'a, ServiceState>,
    effects: Effects,
}

impl<'a> Txn<'a> {
    fn finish(self) {
        let Txn {
            service,
            state,
            effects,
        } = self;
        drop(state);
        effects.dispatch(&service.collaborators);
    }

    fn now(&self) -> WallTime {
        self.service.collaborators.clock.now()
    }

    fn group(&self, user: UserId) -> Vec<UserId> {
        self.service.collaborators.profiles.profiles_of(user)
    }

    fn snapshot_mut(&mut self, user: UserId) -> PolicyResult<&mut UserPolicySnapshot> {
        let service = self.service;
        match self.state.users.entry(user) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(service.read_snapshot(user)?)),
        }
    }

    fn snapshot(&mut self, user: UserId) -> PolicyResult<&UserPolicySnapshot> {
        self.snapshot_mut(user).map(|snap| &*snap)
    }

    fn record(
        &mut self,
        user: UserId,
        who: &AdminIdentity,
    ) -> PolicyResult<Option<&ActiveAdminRecord>> {
        Ok(self.snapshot(user)?.admins.get(who))
    }

    /// Applies `f` to a copy of the snapshot, writes the copy, then swaps it in
    ///
    /// A failed write leaves the in-memory snapshot untouched.
    fn commit<R>(
        &mut self,
        user: UserId,
        f: impl FnOnce(&mut UserPolicySnapshot) -> PolicyResult<R>,
    ) -> PolicyResult<R> {
        let mut next = self.snapshot(user)?.clone();
        let out = f(&mut next)?;
        let bytes = render(&encode_snapshot(&next))?;
        self.service.store.write(RecordKey::User(user), &bytes)?;
        self.state.users.insert(user, next);
        self.effects.push(Effect::PolicyChanged(user));
        Ok(out)
    }

    /// Checks the caller, then commits a change to its own record
    fn commit_admin(
        &mut self,
        user: UserId,
        who: &AdminIdentity,
        capability: PolicyCapability,
        f: impl FnOnce(&mut ActiveAdminRecord),
    ) -> PolicyResult<()> {
        self.check_caller(user, who, capability)?;
        self.commit(user, |snap| {
            let record = snap
                .admins
                .get_mut(who)
                .ok_or_else(|| PolicyError::UnknownAdmin {
                    user,
                    admin: who.clone(),
                })?;
            f(record);
            Ok(())
        })
    }

    fn granted(
        &mut self,
        user: UserId,
        who: &AdminIdentity,
        capability: PolicyCapability,
    ) -> PolicyResult<bool> {
        let declared = self
            .record(user, who)?
            .ok_or_else(|| PolicyError::UnknownAdmin {
                user,
                admin: who.clone(),
            })?
            .uses(capability);
        let owners = &self.state.owners;
        let device_owner = owners.is_device_owner(who.namespace());
        Ok(match capability {
            PolicyCapability::DeviceOwner => device_owner,
            PolicyCapability::ProfileOwner => {
                device_owner || owners.is_profile_owner(who.namespace(), user)
            }
            _ => declared,
        })
    }

    fn check_caller(
        &mut self,
        user: UserId,
        who: &AdminIdentity,
        capability: PolicyCapability,
    ) -> PolicyResult<()> {
        if self.granted(user, who, capability)? {
            Ok(())
        } else {
            Err(PolicyError::MissingCapability {
                admin: who.clone(),
                capability,
            })
        }
    }

    /// Aggregate over every administrator in the profile group of `user`
    fn group_aggregate(&mut self, user: UserId) -> PolicyResult<AggregatePolicy> {
        let group = self.group(user);
        for member in &group {
            self.snapshot(*member)?;
        }
        let users = &self.state.users;
        Ok(aggregate(
            group
                .iter()
                .filter_map(|member| users.get(member))
                .flat_map(|snap| snap.admins.records()),
        ))
    }

    /// Aggregate over the administrators of `user` alone
    fn user_aggregate(&mut self, user: UserId) -> PolicyResult<AggregatePolicy> {
        Ok(aggregate(self.snapshot(user)?.admins.records()))
    }

    /// Queues `event` for every administrator in the group holding `capability`
    fn notify_group(
        &mut self,
        user: UserId,
        capability: PolicyCapability,
        event: AdminEvent,
    ) -> PolicyResult<()> {
        for member in self.group(user) {
            let targets: Vec<AdminIdentity> = self
                .snapshot(member)?
                .admins
                .records()
                .filter(|r| r.uses(capability))
                .map(|r| r.identity.clone())
                .collect();
            for admin in targets {
                self.effects.notify(member, admin, event);
            }
        }
        Ok(())
    }

    /// Queues the enforced values that depend on `user`'s administrators
    fn push_enforcement(&mut self, user: UserId) -> PolicyResult<()> {
        for member in self.group(user) {
            let max = self.group_aggregate(member)?.maximum_time_to_lock_ms;
            let max = (max != 0).then_some(max);
            let snap = self.snapshot_mut(member)?;
            if snap.last_max_time_to_lock == Some(max) {
                continue;
            }
            snap.last_max_time_to_lock = Some(max);
            self.effects.push(Effect::MaxTimeToLock(member, max));
        }
        let camera = self.user_aggregate(user)?.camera_disabled;
        self.effects.push(Effect::CameraDisabled(user, camera));
        if user.is_owner() {
            self.push_device_state()?;
        }
        Ok(())
    }

    /// Queues the device-global values, driven by the owner user
    fn push_device_state(&mut self) -> PolicyResult<()> {
        let owner = self.snapshot(UserId::OWNER)?;
        let encryption = owner.admins.records().any(|r| r.encryption_requested);
        let resolution = global_proxy(owner.admins.records());
        if let ProxyResolution::Conflict(claimants) = &resolution {
            warn!(?claimants, "several admins claim the global proxy, enforcing none");
        }
        let proxy = resolution.effective();
        self.effects.push(Effect::EncryptionRequested(encryption));
        self.effects.push(Effect::GlobalProxy(proxy));
        Ok(())
    }

    fn schedule_expiration_alarm(&mut self, user: UserId) -> PolicyResult<()> {
        let expiration = self.group_aggregate(user)?.password_expiration_date_ms;
        let interval = self.service.config.expiration_alarm_interval_ms;
        let alarm = AlarmId::PasswordExpiration(user);
        match next_expiration_alarm(self.now(), expiration, interval) {
            Some(at) => {
                debug!(%user, %at, "password expiration alarm scheduled");
                self.effects.push(Effect::ScheduleAlarm(alarm, at));
            }
            None => self.effects.push(Effect::CancelAlarm(alarm)),
        }
        Ok(())
    }

    fn complete_removal(&mut self, token: RemovalToken) -> PolicyResult<ActiveAdminRecord> {
        let user = self
            .state
            .users
            .iter()
            .find(|(_, snap)| snap.admins.find_token(token).is_some())
            .map(|(user, _)| *user)
            .ok_or(PolicyError::UnknownRemovalToken(token))?;
        let record = self.commit(user, |snap| {
            let record = snap.admins.complete_removal(token)?;
            snap.validate_password_owner();
            Ok(record)
        })?;
        if record.specifies_global_proxy() {
            info!(admin = %record.identity, "global proxy released by removed admin");
        }
        info!(%user, admin = %record.identity, "admin removed");
        self.push_enforcement(user)?;
        self.schedule_expiration_alarm(user)?;
        Ok(record)
    }

    fn remove_user(&mut self, user: UserId) -> PolicyResult<()> {
        let service = self.service;
        service.store.delete(RecordKey::User(user))?;
        self.state.users.remove(&user);
        self.state
            .owners
            .remove_user(service.store.as_ref(), user)?;
        self.effects
            .push(Effect::CancelAlarm(AlarmId::PasswordExpiration(user)));
        info!(%user, "user policy data removed");
        Ok(())
    }
}

/// Refuses identities that would not survive being written and read back
fn check_identity(identity: &AdminIdentity) -> PolicyResult<()> {
    if identity.is_well_formed() {
        Ok(())
    } else {
        Err(PolicyError::InvalidValue(format!(
            "malformed admin identity {:?}",
            identity.flatten()
        )))
    }
}

fn write_dump(state: &ServiceState, out: &mut impl fmt::Write) -> fmt::Result {
    let owners = &state.owners;
    writeln!(out, "Device policy state:")?;
    match owners.device_owner() {
        Some(owner) => writeln!(out, "  device owner: {} ({})", owner.package, owner.name)?,
        None => writeln!(out, "  device owner: none")?,
    }
    writeln!(out, "  provisioned: {}", owners.is_provisioned())?;
    for (user, owner) in &owners.state().profile_owners {
        writeln!(out, "  profile owner of {}: {} ({})", user, owner.package, owner.name)?;
    }
    for (user, snap) in &state.users {
        writeln!(out, "  {}:", user)?;
        writeln!(out, "    failed password attempts: {}", snap.failed_password_attempts)?;
        if let Some(owner) = &snap.password_owner {
            writeln!(out, "    password owner: {}", owner)?;
        }
        writeln!(out, "    active password quality: {}", snap.active_password.quality)?;
        if !snap.lock_task_packages.is_empty() {
            writeln!(out, "    lock task packages: {}", snap.lock_task_packages.join(", "))?;
        }
        for record in snap.admins.records() {
            let pending = match snap.admins.state_of(&record.identity) {
                AdminState::PendingRemoval => " (removal pending)",
                _ => "",
            };
            writeln!(out, "    admin {}{}", record.identity, pending)?;
            writeln!(out, "      policies: {}", record.capabilities)?;
            writeln!(
                out,
                "      password quality={} length={} history={}",
                record.password_quality, record.minimum_password_length, record.password_history_length
            )?;
            writeln!(
                out,
                "      max time to lock={}ms wipe after={} camera disabled={}",
                record.maximum_time_to_lock_ms,
                record.maximum_failed_passwords_for_wipe,
                record.camera_disabled
            )?;
            if let Some(proxy) = &record.global_proxy {
                writeln!(out, "      global proxy: {}", proxy.spec)?;
            }
        }
    }
    Ok(())
}
