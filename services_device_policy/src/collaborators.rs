//! Injected collaborators of the policy service
//!
//! The service never reaches out to the rest of the system directly. It is
//! handed one implementation of each trait here and calls them after its
//! state lock has been released.

use core_types::{AdminIdentity, UserId};
use lifecycle::{Clock, SystemClock, WallTime};
use policy::{GlobalProxy, PasswordQuality};
use std::fmt;
use std::sync::Arc;

/// Event delivered to an administrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AdminEvent {
    Enabled,
    Disabled,
    PasswordChanged,
    PasswordFailed,
    PasswordSucceeded,
    PasswordExpiring,
    LockTaskChanged,
}

impl fmt::Display for AdminEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdminEvent::Enabled => "enabled",
            AdminEvent::Disabled => "disabled",
            AdminEvent::PasswordChanged => "password-changed",
            AdminEvent::PasswordFailed => "password-failed",
            AdminEvent::PasswordSucceeded => "password-succeeded",
            AdminEvent::PasswordExpiring => "password-expiring",
            AdminEvent::LockTaskChanged => "lock-task-changed",
        };
        f.write_str(name)
    }
}

/// How a notification was delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The administrator handled the event before `notify` returned
    Synchronous,
    /// The administrator will acknowledge later
    Deferred,
}

/// Alarms the service schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlarmId {
    PasswordExpiration(UserId),
}

pub trait Transport: Send + Sync {
    fn notify(
        &self,
        user: UserId,
        admin: &AdminIdentity,
        event: AdminEvent,
        extras: &[(String, String)],
    ) -> Delivery;

    /// Announces that the stored policy of `user` changed
    fn broadcast_policy_changed(&self, user: UserId);
}

pub trait Liveness: Send + Sync {
    /// Whether the administrator's package is still installed for `user`
    fn is_installed(&self, user: UserId, admin: &AdminIdentity) -> bool;

    fn is_package_installed(&self, user: UserId, package: &str) -> bool;
}

/// Knowledge of users and how they group into profiles
pub trait ProfileDirectory: Send + Sync {
    /// Users sharing a lock screen with `user`, including `user` itself
    fn profiles_of(&self, user: UserId) -> Vec<UserId>;

    fn profile_parent(&self, user: UserId) -> Option<UserId>;

    fn existing_users(&self) -> Vec<UserId>;
}

pub trait CredentialStore: Send + Sync {
    /// Quality of the password actually stored for `user`
    fn measured_quality(&self, user: UserId) -> PasswordQuality;

    fn set_password(
        &self,
        password: &str,
        quality: PasswordQuality,
        user: UserId,
    ) -> Result<(), String>;
}

pub trait Scheduler: Send + Sync {
    fn schedule_at(&self, alarm: AlarmId, at: WallTime);

    fn cancel(&self, alarm: AlarmId);
}

/// Sink for aggregate values that something else enforces
pub trait EnforcementSink: Send + Sync {
    /// `None` means no limit
    fn apply_max_time_to_lock(&self, user: UserId, max_ms: Option<u64>);

    fn apply_camera_disabled(&self, user: UserId, disabled: bool);

    fn apply_encryption_requested(&self, requested: bool);

    fn apply_global_proxy(&self, proxy: Option<&GlobalProxy>);

    fn lock_now(&self, user: UserId);
}

pub trait DeviceWiper: Send + Sync {
    fn wipe(&self, user: UserId);
}

/// No-op collaborators
///
/// Every package is installed, each user is its own profile group and every
/// delivery is deferred.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCollaborators;

impl Transport for NullCollaborators {
    fn notify(&self, _: UserId, _: &AdminIdentity, _: AdminEvent, _: &[(String, String)]) -> Delivery {
        Delivery::Deferred
    }

    fn broadcast_policy_changed(&self, _: UserId) {}
}

impl Liveness for NullCollaborators {
    fn is_installed(&self, _: UserId, _: &AdminIdentity) -> bool {
        true
    }

    fn is_package_installed(&self, _: UserId, _: &str) -> bool {
        true
    }
}

impl ProfileDirectory for NullCollaborators {
    fn profiles_of(&self, user: UserId) -> Vec<UserId> {
        vec![user]
    }

    fn profile_parent(&self, _: UserId) -> Option<UserId> {
        None
    }

    fn existing_users(&self) -> Vec<UserId> {
        vec![UserId::OWNER]
    }
}

impl CredentialStore for NullCollaborators {
    fn measured_quality(&self, _: UserId) -> PasswordQuality {
        PasswordQuality::Complex
    }

    fn set_password(&self, _: &str, _: PasswordQuality, _: UserId) -> Result<(), String> {
        Ok(())
    }
}

impl Scheduler for NullCollaborators {
    fn schedule_at(&self, _: AlarmId, _: WallTime) {}

    fn cancel(&self, _: AlarmId) {}
}

impl EnforcementSink for NullCollaborators {
    fn apply_max_time_to_lock(&self, _: UserId, _: Option<u64>) {}

    fn apply_camera_disabled(&self, _: UserId, _: bool) {}

    fn apply_encryption_requested(&self, _: bool) {}

    fn apply_global_proxy(&self, _: Option<&GlobalProxy>) {}

    fn lock_now(&self, _: UserId) {}
}

impl DeviceWiper for NullCollaborators {
    fn wipe(&self, _: UserId) {}
}

/// The full set of collaborators handed to a service
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub liveness: Arc<dyn Liveness>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub scheduler: Arc<dyn Scheduler>,
    pub enforcement: Arc<dyn EnforcementSink>,
    pub wiper: Arc<dyn DeviceWiper>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Null collaborators on the system clock
    pub fn null() -> Self {
        let null = Arc::new(NullCollaborators);
        Self {
            transport: null.clone(),
            liveness: null.clone(),
            profiles: null.clone(),
            credentials: null.clone(),
            scheduler: null.clone(),
            enforcement: null.clone(),
            wiper: null,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_liveness(mut self, liveness: Arc<dyn Liveness>) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileDirectory>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_enforcement(mut self, enforcement: Arc<dyn EnforcementSink>) -> Self {
        self.enforcement = enforcement;
        self
    }

    pub fn with_wiper(mut self, wiper: Arc<dyn DeviceWiper>) -> Self {
        self.wiper = wiper;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("now", &self.clock.now())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle::ManualClock;

    #[test]
    fn test_null_collaborators() {
        let c = Collaborators::null();
        let admin = AdminIdentity::new("pkg", "A");
        assert_eq!(
            c.transport
                .notify(UserId::OWNER, &admin, AdminEvent::Enabled, &[]),
            Delivery::Deferred
        );
        assert!(c.liveness.is_installed(UserId::new(10), &admin));
        assert_eq!(c.profiles.profiles_of(UserId::new(10)), vec![UserId::new(10)]);
        assert_eq!(c.profiles.profile_parent(UserId::new(10)), None);
        assert!(c
            .credentials
            .set_password("pw", PasswordQuality::Numeric, UserId::OWNER)
            .is_ok());
    }

    #[test]
    fn test_with_clock() {
        let clock = Arc::new(ManualClock::new(WallTime::from_millis(42)));
        let c = Collaborators::null().with_clock(clock.clone());
        assert_eq!(c.clock.now(), WallTime::from_millis(42));
        clock.advance(8);
        assert_eq!(c.clock.now(), WallTime::from_millis(50));
    }

    #[test]
    fn test_event_display() {
        assert_eq!(AdminEvent::PasswordExpiring.to_string(), "password-expiring");
    }
}
