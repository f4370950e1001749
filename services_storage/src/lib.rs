//! # Storage Service
//!
//! Durable, crash-safe storage of whole policy records.
//!
//! ## Philosophy
//!
//! **A record is either the old bytes or the new bytes, never a mix.**
//!
//! Every write replaces an entire record. Callers never patch a record in
//! place, so there is nothing to recover except "which complete copy is the
//! newest valid one".
//!
//! ## Design
//!
//! - **RecordKey**: Names a record (one per user, plus the owner record)
//! - **RecordStore**: Write / read / delete of whole records
//! - **FileJournal**: Primary + staging file pair, checksummed frames
//! - **MemoryJournal**: Same contract in memory, for tests and ephemeral runs
//! - **FailingJournal**: Failure injection wrapper for crash testing

pub mod failing_journal;
pub mod journal;
pub mod memory;
pub mod record;

pub use failing_journal::{FailingJournal, FailurePolicy};
pub use journal::FileJournal;
pub use memory::MemoryJournal;
pub use record::{RecordKey, RecordStore, StorageError};
