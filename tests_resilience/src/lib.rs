//! Resilience Test Utilities
//!
//! This crate provides shared utilities for the policy service integration
//! tests.
//!
//! ## Test Philosophy
//!
//! - **Safety under faults**: Memory and journal agree even when writes fail
//! - **Deterministic failures**: All faults are reproducible via `FailurePolicy`
//! - **Observable effects**: Every collaborator call is recorded by `FakeDevice`
//! - **Restartable**: A harness can be restarted over the same journal

use core_types::{AdminIdentity, PolicyCapabilities, PolicyCapability, UserId};
use lifecycle::{ManualClock, WallTime};
use policy::{GlobalProxy, PasswordQuality};
use services_device_policy::{
    AdminEvent, AlarmId, Collaborators, CredentialStore, Delivery, DeviceWiper, EnforcementSink,
    Liveness, PolicyService, PolicyServiceConfig, ProfileDirectory, Scheduler, Transport,
};
use services_storage::{FailingJournal, FailurePolicy, MemoryJournal, RecordStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Wall time every harness starts at
pub const START: WallTime = WallTime::from_millis(1_700_000_000_000);

/// One notification delivered to an administrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user: UserId,
    pub admin: AdminIdentity,
    pub event: AdminEvent,
    pub extras: Vec<(String, String)>,
}

#[derive(Debug)]
struct DeviceState {
    delivery: Delivery,
    uninstalled: BTreeSet<String>,
    parents: BTreeMap<UserId, UserId>,
    users: BTreeSet<UserId>,
    measured: PasswordQuality,
    rejected_passwords: bool,
    notifications: Vec<Notification>,
    policy_changes: Vec<UserId>,
    alarms: BTreeMap<AlarmId, WallTime>,
    wipes: Vec<UserId>,
    locks: Vec<UserId>,
    passwords: Vec<(UserId, PasswordQuality)>,
    max_time_to_lock: BTreeMap<UserId, Option<u64>>,
    lock_pushes: Vec<UserId>,
    camera: BTreeMap<UserId, bool>,
    encryption: Option<bool>,
    proxy: Option<Option<GlobalProxy>>,
}

/// Scriptable stand-in for every collaborator of the policy service
///
/// Starts with only the owner user, every package installed and deferred
/// delivery.
#[derive(Debug)]
pub struct FakeDevice {
    state: Mutex<DeviceState>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState {
                delivery: Delivery::Deferred,
                uninstalled: BTreeSet::new(),
                parents: BTreeMap::new(),
                users: [UserId::OWNER].into_iter().collect(),
                measured: PasswordQuality::Complex,
                rejected_passwords: false,
                notifications: Vec::new(),
                policy_changes: Vec::new(),
                alarms: BTreeMap::new(),
                wipes: Vec::new(),
                locks: Vec::new(),
                passwords: Vec::new(),
                max_time_to_lock: BTreeMap::new(),
                lock_pushes: Vec::new(),
                camera: BTreeMap::new(),
                encryption: None,
                proxy: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("fake device lock poisoned")
    }

    pub fn set_delivery(&self, delivery: Delivery) {
        self.lock().delivery = delivery;
    }

    pub fn uninstall(&self, package: &str) {
        self.lock().uninstalled.insert(package.to_string());
    }

    pub fn add_user(&self, user: UserId) {
        self.lock().users.insert(user);
    }

    /// Adds `profile` as a managed profile sharing `parent`'s lock screen
    pub fn add_profile(&self, parent: UserId, profile: UserId) {
        let mut state = self.lock();
        state.users.insert(profile);
        state.parents.insert(profile, parent);
    }

    /// Forgets a user as if it had been deleted from the device
    pub fn delete_user(&self, user: UserId) {
        let mut state = self.lock();
        state.users.remove(&user);
        state.parents.remove(&user);
    }

    pub fn set_measured_quality(&self, quality: PasswordQuality) {
        self.lock().measured = quality;
    }

    pub fn reject_passwords(&self, reject: bool) {
        self.lock().rejected_passwords = reject;
    }

    /// Forgets every enforcement push seen so far
    pub fn clear_enforcement(&self) {
        let mut state = self.lock();
        state.max_time_to_lock.clear();
        state.lock_pushes.clear();
        state.camera.clear();
        state.encryption = None;
        state.proxy = None;
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    /// Events delivered to one administrator, in order
    pub fn events_for(&self, admin: &AdminIdentity) -> Vec<AdminEvent> {
        self.lock()
            .notifications
            .iter()
            .filter(|n| &n.admin == admin)
            .map(|n| n.event)
            .collect()
    }

    pub fn policy_changes(&self) -> Vec<UserId> {
        self.lock().policy_changes.clone()
    }

    pub fn alarm(&self, user: UserId) -> Option<WallTime> {
        self.lock()
            .alarms
            .get(&AlarmId::PasswordExpiration(user))
            .copied()
    }

    pub fn wipes(&self) -> Vec<UserId> {
        self.lock().wipes.clone()
    }

    pub fn locks(&self) -> Vec<UserId> {
        self.lock().locks.clone()
    }

    pub fn passwords(&self) -> Vec<(UserId, PasswordQuality)> {
        self.lock().passwords.clone()
    }

    /// Last value pushed for `user`; `None` if nothing was pushed yet
    pub fn max_time_to_lock(&self, user: UserId) -> Option<Option<u64>> {
        self.lock().max_time_to_lock.get(&user).copied()
    }

    /// How many screen lock limits were pushed for `user`
    pub fn max_time_to_lock_pushes(&self, user: UserId) -> usize {
        self.lock().lock_pushes.iter().filter(|u| **u == user).count()
    }

    pub fn camera_disabled(&self, user: UserId) -> Option<bool> {
        self.lock().camera.get(&user).copied()
    }

    pub fn encryption_requested(&self) -> Option<bool> {
        self.lock().encryption
    }

    pub fn global_proxy(&self) -> Option<Option<GlobalProxy>> {
        self.lock().proxy.clone()
    }
}

impl Transport for FakeDevice {
    fn notify(
        &self,
        user: UserId,
        admin: &AdminIdentity,
        event: AdminEvent,
        extras: &[(String, String)],
    ) -> Delivery {
        let mut state = self.lock();
        state.notifications.push(Notification {
            user,
            admin: admin.clone(),
            event,
            extras: extras.to_vec(),
        });
        state.delivery
    }

    fn broadcast_policy_changed(&self, user: UserId) {
        self.lock().policy_changes.push(user);
    }
}

impl Liveness for FakeDevice {
    fn is_installed(&self, user: UserId, admin: &AdminIdentity) -> bool {
        self.is_package_installed(user, admin.namespace())
    }

    fn is_package_installed(&self, _user: UserId, package: &str) -> bool {
        !self.lock().uninstalled.contains(package)
    }
}

impl ProfileDirectory for FakeDevice {
    fn profiles_of(&self, user: UserId) -> Vec<UserId> {
        let state = self.lock();
        let root = state.parents.get(&user).copied().unwrap_or(user);
        let mut group = vec![root];
        group.extend(
            state
                .parents
                .iter()
                .filter(|(_, parent)| **parent == root)
                .map(|(profile, _)| *profile),
        );
        group
    }

    fn profile_parent(&self, user: UserId) -> Option<UserId> {
        self.lock().parents.get(&user).copied()
    }

    fn existing_users(&self) -> Vec<UserId> {
        self.lock().users.iter().copied().collect()
    }
}

impl CredentialStore for FakeDevice {
    fn measured_quality(&self, _user: UserId) -> PasswordQuality {
        self.lock().measured
    }

    fn set_password(
        &self,
        _password: &str,
        quality: PasswordQuality,
        user: UserId,
    ) -> Result<(), String> {
        let mut state = self.lock();
        if state.rejected_passwords {
            return Err("credential store refused the password".to_string());
        }
        state.passwords.push((user, quality));
        Ok(())
    }
}

impl Scheduler for FakeDevice {
    fn schedule_at(&self, alarm: AlarmId, at: WallTime) {
        self.lock().alarms.insert(alarm, at);
    }

    fn cancel(&self, alarm: AlarmId) {
        self.lock().alarms.remove(&alarm);
    }
}

impl EnforcementSink for FakeDevice {
    fn apply_max_time_to_lock(&self, user: UserId, max_ms: Option<u64>) {
        let mut state = self.lock();
        state.max_time_to_lock.insert(user, max_ms);
        state.lock_pushes.push(user);
    }

    fn apply_camera_disabled(&self, user: UserId, disabled: bool) {
        self.lock().camera.insert(user, disabled);
    }

    fn apply_encryption_requested(&self, requested: bool) {
        self.lock().encryption = Some(requested);
    }

    fn apply_global_proxy(&self, proxy: Option<&GlobalProxy>) {
        self.lock().proxy = Some(proxy.cloned());
    }

    fn lock_now(&self, user: UserId) {
        self.lock().locks.push(user);
    }
}

impl DeviceWiper for FakeDevice {
    fn wipe(&self, user: UserId) {
        self.lock().wipes.push(user);
    }
}

/// A service wired to a `FakeDevice`, a manual clock and a shared store
pub struct PolicyHarness<S: RecordStore + 'static> {
    pub service: PolicyService,
    pub device: Arc<FakeDevice>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<S>,
    pub config: PolicyServiceConfig,
}

impl<S: RecordStore + 'static> PolicyHarness<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, PolicyServiceConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: PolicyServiceConfig) -> Self {
        let device = Arc::new(FakeDevice::new());
        let clock = Arc::new(ManualClock::new(START));
        let service = build_service(&store, &device, &clock, &config);
        Self {
            service,
            device,
            clock,
            store,
            config,
        }
    }

    /// Replaces the service with a fresh one over the same journal
    pub fn restart(&mut self) {
        self.service = build_service(&self.store, &self.device, &self.clock, &self.config);
    }
}

fn build_service<S: RecordStore + 'static>(
    store: &Arc<S>,
    device: &Arc<FakeDevice>,
    clock: &Arc<ManualClock>,
    config: &PolicyServiceConfig,
) -> PolicyService {
    let collaborators = Collaborators::null()
        .with_transport(device.clone())
        .with_liveness(device.clone())
        .with_profiles(device.clone())
        .with_credentials(device.clone())
        .with_scheduler(device.clone())
        .with_enforcement(device.clone())
        .with_wiper(device.clone())
        .with_clock(clock.clone());
    PolicyService::new(config.clone(), store.clone(), collaborators)
        .expect("Failed to start policy service")
}

/// Harness over an in-memory journal that can be told to fail writes
pub fn memory_harness() -> PolicyHarness<FailingJournal<MemoryJournal>> {
    PolicyHarness::new(Arc::new(FailingJournal::new(
        MemoryJournal::new(),
        FailurePolicy::Never,
    )))
}

pub fn admin(package: &str, name: &str) -> AdminIdentity {
    AdminIdentity::new(package, name)
}

pub fn caps(list: &[PolicyCapability]) -> PolicyCapabilities {
    list.iter().copied().collect()
}
