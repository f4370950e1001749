//! # Failing Journal
//!
//! A RecordStore wrapper that can simulate write failures for testing that
//! callers keep memory and disk consistent when persistence fails.

use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::record::{RecordKey, RecordStore, StorageError};

/// Policy for when failures should occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Never fail (passthrough)
    Never,
    /// Fail every write after N successful writes
    AfterWrites(usize),
    /// Fail writes to specific records
    OnKeys(BTreeSet<RecordKey>),
    /// Fail every write
    Always,
}

#[derive(Debug)]
struct FailureState {
    policy: FailurePolicy,
    write_count: usize,
    failed_writes: usize,
}

/// Wrapper around a RecordStore that can simulate failures
///
/// Reads and deletes always pass through; only writes are failed.
#[derive(Debug)]
pub struct FailingJournal<S: RecordStore> {
    inner: S,
    state: Mutex<FailureState>,
}

impl<S: RecordStore> FailingJournal<S> {
    /// Create a new failing journal with the given policy
    pub fn new(inner: S, policy: FailurePolicy) -> Self {
        Self {
            inner,
            state: Mutex::new(FailureState {
                policy,
                write_count: 0,
                failed_writes: 0,
            }),
        }
    }

    /// Get the underlying store (for inspection)
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of writes that reached the inner store
    pub fn write_count(&self) -> usize {
        self.with_state(|s| s.write_count)
    }

    /// Number of writes that were failed on purpose
    pub fn failed_writes(&self) -> usize {
        self.with_state(|s| s.failed_writes)
    }

    /// Replace the failure policy and reset counters
    pub fn set_policy(&self, policy: FailurePolicy) {
        self.with_state(|s| {
            s.policy = policy;
            s.write_count = 0;
            s.failed_writes = 0;
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FailureState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn should_fail(state: &FailureState, key: RecordKey) -> bool {
        match &state.policy {
            FailurePolicy::Never => false,
            FailurePolicy::AfterWrites(n) => state.write_count >= *n,
            FailurePolicy::OnKeys(keys) => keys.contains(&key),
            FailurePolicy::Always => true,
        }
    }
}

impl<S: RecordStore> RecordStore for FailingJournal<S> {
    fn write(&self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError> {
        let fail = self.with_state(|s| {
            if Self::should_fail(s, key) {
                s.failed_writes += 1;
                true
            } else {
                s.write_count += 1;
                false
            }
        });
        if fail {
            return Err(StorageError::Io {
                key,
                detail: "injected write failure".to_string(),
            });
        }
        self.inner.write(key, bytes)
    }

    fn read(&self, key: RecordKey) -> Result<Vec<u8>, StorageError> {
        self.inner.read(key)
    }

    fn delete(&self, key: RecordKey) -> Result<(), StorageError> {
        self.inner.delete(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryJournal;
    use core_types::UserId;

    const A: RecordKey = RecordKey::User(UserId::new(0));
    const B: RecordKey = RecordKey::User(UserId::new(10));

    #[test]
    fn test_failing_journal_never() {
        let journal = FailingJournal::new(MemoryJournal::new(), FailurePolicy::Never);
        assert!(journal.write(A, b"1").is_ok());
        assert!(journal.write(B, b"2").is_ok());
        assert_eq!(journal.write_count(), 2);
    }

    #[test]
    fn test_failing_journal_after_writes() {
        let journal = FailingJournal::new(MemoryJournal::new(), FailurePolicy::AfterWrites(2));
        assert!(journal.write(A, b"1").is_ok());
        assert!(journal.write(A, b"2").is_ok());
        assert!(matches!(journal.write(A, b"3"), Err(StorageError::Io { .. })));
        assert_eq!(journal.read(A).unwrap(), b"2");
        assert_eq!(journal.failed_writes(), 1);
    }

    #[test]
    fn test_failing_journal_on_keys() {
        let keys: BTreeSet<RecordKey> = [B].into_iter().collect();
        let journal = FailingJournal::new(MemoryJournal::new(), FailurePolicy::OnKeys(keys));
        assert!(journal.write(A, b"1").is_ok());
        assert!(journal.write(B, b"1").is_err());
        assert!(journal.read(B).unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_policy_resets() {
        let journal = FailingJournal::new(MemoryJournal::new(), FailurePolicy::Always);
        assert!(journal.write(A, b"1").is_err());
        journal.set_policy(FailurePolicy::Never);
        assert!(journal.write(A, b"1").is_ok());
        assert_eq!(journal.failed_writes(), 0);
        assert_eq!(journal.inner().keys(), vec![A]);
    }
}
