//! Per-user set of registered administrators
//!
//! Records live in an insertion-ordered list with an identity index next to
//! it. Both are only ever changed together. Removal is two-phase: a record
//! first becomes pending (and keeps contributing to aggregates), then is
//! removed when the removal is acknowledged.

use core_types::{AdminIdentity, PolicyCapabilities, RemovalToken, UserId};
use lifecycle::{Deadline, WallTime};
use policy::ActiveAdminRecord;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{PolicyError, PolicyResult};

/// Lifecycle state of an identity within one registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminState {
    Unregistered,
    Active,
    PendingRemoval,
}

/// An issued but not yet acknowledged removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRemoval {
    pub token: RemovalToken,
    pub deadline: Deadline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminRegistry {
    user: UserId,
    records: Vec<ActiveAdminRecord>,
    index: BTreeMap<AdminIdentity, usize>,
    pending: BTreeMap<AdminIdentity, PendingRemoval>,
}

impl AdminRegistry {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            ..Self::default()
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in registration order, including pending ones
    pub fn records(&self) -> std::slice::Iter<'_, ActiveAdminRecord> {
        self.records.iter()
    }

    pub fn identities(&self) -> Vec<AdminIdentity> {
        self.records.iter().map(|r| r.identity.clone()).collect()
    }

    pub fn get(&self, identity: &AdminIdentity) -> Option<&ActiveAdminRecord> {
        self.index.get(identity).and_then(|&i| self.records.get(i))
    }

    pub fn get_mut(&mut self, identity: &AdminIdentity) -> Option<&mut ActiveAdminRecord> {
        match self.index.get(identity) {
            Some(&i) => self.records.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, identity: &AdminIdentity) -> bool {
        self.index.contains_key(identity)
    }

    pub fn state_of(&self, identity: &AdminIdentity) -> AdminState {
        if self.pending.contains_key(identity) {
            AdminState::PendingRemoval
        } else if self.contains(identity) {
            AdminState::Active
        } else {
            AdminState::Unregistered
        }
    }

    /// Registers an administrator with default policy values
    ///
    /// Refreshing an existing registration replaces its record in place,
    /// keeping its position in the ordering.
    pub fn register(
        &mut self,
        identity: AdminIdentity,
        capabilities: PolicyCapabilities,
        refreshing: bool,
    ) -> PolicyResult<&ActiveAdminRecord> {
        if self.pending.contains_key(&identity) {
            return Err(PolicyError::RemovalPending(identity));
        }
        let record = ActiveAdminRecord::new(identity.clone(), capabilities);
        let existing = self.index.get(&identity).copied();
        let slot = match existing {
            Some(_) if !refreshing => return Err(PolicyError::AlreadyRegistered(identity)),
            Some(i) => {
                self.records[i] = record;
                i
            }
            None => {
                self.records.push(record);
                let i = self.records.len() - 1;
                self.index.insert(identity, i);
                i
            }
        };
        Ok(&self.records[slot])
    }

    /// Re-inserts a decoded record at the end; false on duplicate identity
    pub(crate) fn restore(&mut self, record: ActiveAdminRecord) -> bool {
        if self.index.contains_key(&record.identity) {
            return false;
        }
        self.index.insert(record.identity.clone(), self.records.len());
        self.records.push(record);
        true
    }

    /// First phase of removal
    ///
    /// Asking again for an identity that is already pending returns the
    /// token issued the first time.
    pub fn begin_removal(
        &mut self,
        identity: &AdminIdentity,
        deadline: Deadline,
    ) -> PolicyResult<RemovalToken> {
        if let Some(pending) = self.pending.get(identity) {
            return Ok(pending.token);
        }
        if !self.contains(identity) {
            return Err(PolicyError::UnknownAdmin {
                user: self.user,
                admin: identity.clone(),
            });
        }
        let token = RemovalToken::new();
        self.pending
            .insert(identity.clone(), PendingRemoval { token, deadline });
        debug!(user = %self.user, admin = %identity, %token, "admin removal pending");
        Ok(token)
    }

    pub fn pending_removal(&self, identity: &AdminIdentity) -> Option<&PendingRemoval> {
        self.pending.get(identity)
    }

    /// Identity a removal token was issued for
    pub fn find_token(&self, token: RemovalToken) -> Option<&AdminIdentity> {
        self.pending
            .iter()
            .find(|(_, p)| p.token == token)
            .map(|(id, _)| id)
    }

    /// Second phase of removal
    pub fn complete_removal(&mut self, token: RemovalToken) -> PolicyResult<ActiveAdminRecord> {
        let identity = self
            .find_token(token)
            .cloned()
            .ok_or(PolicyError::UnknownRemovalToken(token))?;
        self.pending.remove(&identity);
        self.remove(&identity)
            .ok_or(PolicyError::UnknownRemovalToken(token))
    }

    /// Tokens whose acknowledgement deadline has passed
    pub fn overdue_removals(&self, now: WallTime) -> Vec<RemovalToken> {
        self.pending
            .values()
            .filter(|p| p.deadline.has_passed(now))
            .map(|p| p.token)
            .collect()
    }

    /// Removes every record whose package is gone, pending or not
    pub fn prune(
        &mut self,
        mut is_installed: impl FnMut(&AdminIdentity) -> bool,
    ) -> Vec<ActiveAdminRecord> {
        let gone: Vec<AdminIdentity> = self
            .records
            .iter()
            .filter(|r| !is_installed(&r.identity))
            .map(|r| r.identity.clone())
            .collect();
        gone.iter()
            .filter_map(|id| {
                self.pending.remove(id);
                self.remove(id)
            })
            .collect()
    }

    fn remove(&mut self, identity: &AdminIdentity) -> Option<ActiveAdminRecord> {
        let i = self.index.remove(identity)?;
        let record = self.records.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::PolicyCapability;

    fn id(name: &str) -> AdminIdentity {
        AdminIdentity::new("com.example", name)
    }

    fn caps() -> PolicyCapabilities {
        PolicyCapabilities::new().with(PolicyCapability::LimitPassword)
    }

    fn deadline(ms: u64) -> Deadline {
        Deadline::at(WallTime::from_millis(ms))
    }

    #[test]
    fn test_register_appends_in_order() {
        let mut reg = AdminRegistry::new(UserId::OWNER);
        reg.register(id("A"), caps(), false).unwrap();
        reg.register(id("B"), caps(), false).unwrap();
        assert_eq!(reg.identities(), vec![id("A"), id("B")]);
        assert_eq!(reg.state_of(&id("A")), AdminState::Active);
        assert_eq!(reg.state_of(&id("C")), AdminState::Unregistered);
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut reg = AdminRegistry::new(UserId::OWNER);
        reg.register(id("A"), caps(), false).unwrap();
        assert_eq!(
            reg.register(id("A"), caps(), false).unwrap_err(),
            PolicyError::AlreadyRegistered(id("A"))
        );
    }

    #[test]
    fn test_refresh_replaces_in_place() {
        let mut reg = AdminRegistry::new(UserId::OWNER);
        reg.register(id("A"), caps(), false).unwrap();
        reg.register(id("B"), caps(), false).unwrap();
        reg.get_mut(&id("A")).unwrap().minimum_password_length = 9;

        let refreshed = reg
            .register(id("A"), PolicyCapabilities::all(), true)
            .unwrap();
        assert_eq!(refreshed.minimum_password_length, 0);
        assert_eq!(reg.identities(), vec![id("A"), id("B")]);
        assert!(reg.get(&id("A")).unwrap().uses(PolicyCapability::WipeData));
    }

    #[test]
    fn test_two_phase_removal() {
        let mut reg = AdminRegistry::new(UserId::OWNER);
        reg.register(id("A"), caps(), false).unwrap();
        reg.register(id("B"), caps(), false).unwrap();

        let token = reg.begin_removal(&id("A"), deadline(100)).unwrap();
        assert_eq!(reg.state_of(&id("A")), AdminState::PendingRemoval);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.begin_removal(&id("A"), deadline(500)).unwrap(), token);

        let removed = reg.complete_removal(token).unwrap();
        assert_eq!(removed.identity, id("A"));
        assert_eq!(reg.identities(), vec![id("B")]);
        assert!(reg.get(&id("B")).is_some());
        assert_eq!(
            reg.complete_removal(token).unwrap_err(),
            PolicyError::UnknownRemovalToken(token)
        );
    }

    #[test]
    fn test_register_while_pending_fails() {
        let mut reg = AdminRegistry::new(UserId::OWNER);
        reg.register(id("A"), caps(), false).unwrap();
        reg.begin_removal(&id("A"), deadline(100)).unwrap();
        assert_eq!(
            reg.register(id("A"), caps(), true).unwrap_err(),
            PolicyError::RemovalPending(id("A"))
        );
    }

    #[test]
    fn test_begin_removal_unknown() {
        let mut reg = AdminRegistry::new(UserId::new(10));
        assert!(matches!(
            reg.begin_removal(&id("X"), deadline(1)),
            Err(PolicyError::UnknownAdmin { .. })
        ));
    }

    #[test]
    fn test_overdue_removals() {
        let mut reg = AdminRegistry::new(UserId::OWNER);
        reg.register(id("A"), caps(), false).unwrap();
        reg.register(id("B"), caps(), false).unwrap();
        let early = reg.begin_removal(&id("A"), deadline(100)).unwrap();
        reg.begin_removal(&id("B"), deadline(200)).unwrap();
        assert!(reg.overdue_removals(WallTime::from_millis(99)).is_empty());
        assert_eq!(reg.overdue_removals(WallTime::from_millis(150)), vec![early]);
        assert_eq!(reg.overdue_removals(WallTime::from_millis(200)).len(), 2);
    }

    #[test]
    fn test_prune_removes_pending_too() {
        let mut reg = AdminRegistry::new(UserId::OWNER);
        reg.register(id("A"), caps(), false).unwrap();
        reg.register(AdminIdentity::new("gone.pkg", "X"), caps(), false)
            .unwrap();
        reg.register(id("C"), caps(), false).unwrap();
        reg.begin_removal(&AdminIdentity::new("gone.pkg", "X"), deadline(10))
            .unwrap();

        let removed = reg.prune(|admin| admin.namespace() != "gone.pkg");
        assert_eq!(removed.len(), 1);
        assert_eq!(reg.identities(), vec![id("A"), id("C")]);
        assert!(reg.get(&id("C")).is_some());
        assert!(reg.overdue_removals(WallTime::from_millis(1_000)).is_empty());
    }
}
