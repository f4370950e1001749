//! # Device Policy Service
//!
//! Stores the policies that device administrators assert, combines them into
//! the values the device enforces, and tracks who owns the device.
//!
//! ## Philosophy
//!
//! - **Durable first**: A change is visible only after its record reached the
//!   journal; a failed write changes nothing
//! - **Explicit service**: One `PolicyService` instance, built with its
//!   collaborators and configuration, no globals
//! - **Capability-checked**: Every setter names the capability its caller
//!   must hold
//! - **Effects after unlock**: Collaborators are only called once the state
//!   lock is released
//!
//! ## Core Concepts
//!
//! - `AdminRegistry`: Administrators of one user, with two-phase removal
//! - `UserPolicySnapshot`: Everything persisted for one user
//! - `OwnerHierarchy`: Device owner, profile owners, provisioning latches
//! - `RecordNode`: Tagged record tree the snapshots are encoded into
//! - `PolicyService`: The operations, run under one lock
//!
//! ## Example
//!
//! ```
//! use core_types::{AdminIdentity, PolicyCapabilities, PolicyCapability, UserId};
//! use services_device_policy::{Collaborators, PolicyService, PolicyServiceConfig};
//! use services_storage::MemoryJournal;
//! use std::sync::Arc;
//!
//! let service = PolicyService::new(
//!     PolicyServiceConfig::default(),
//!     Arc::new(MemoryJournal::new()),
//!     Collaborators::null(),
//! )
//! .unwrap();
//!
//! let admin = AdminIdentity::new("com.example.mdm", "Admin");
//! let caps = PolicyCapabilities::new().with(PolicyCapability::LimitPassword);
//! service
//!     .set_active_admin(UserId::OWNER, admin.clone(), caps, false)
//!     .unwrap();
//! service
//!     .set_password_minimum_length(UserId::OWNER, &admin, 8)
//!     .unwrap();
//! assert_eq!(service.password_minimum_length(UserId::OWNER, None).unwrap(), 8);
//! ```
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A transport; administrators are reached through the `Transport` trait
//! - An enforcement point; aggregates are pushed to an `EnforcementSink`
//! - A credential store

pub mod codec;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod owners;
pub mod persistence;
pub mod registry;
pub mod service;
pub mod snapshot;

pub use collaborators::{
    AdminEvent, AlarmId, Collaborators, CredentialStore, Delivery, DeviceWiper, EnforcementSink,
    Liveness, NullCollaborators, ProfileDirectory, Scheduler, Transport,
};
pub use config::{ConfigError, PolicyServiceConfig};
pub use error::{ErrorKind, PolicyError, PolicyResult};
pub use owners::OwnerHierarchy;
pub use persistence::{CodecError, RecordDocument, RecordNode};
pub use registry::{AdminRegistry, AdminState, PendingRemoval};
pub use service::{PolicyService, RemovalOutcome};
pub use snapshot::{OwnerEntry, OwnerState, UserPolicySnapshot};
