//! # Core Types
//!
//! This crate defines the fundamental types shared by the device policy
//! workspace.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: Administrators are named by a structured
//!   identity, never by a loose string.
//! - **Type safety first**: User ids, removal tokens and capabilities are
//!   distinct types and cannot be confused.
//! - **Fixed grants**: The capability set of an administrator is fixed at
//!   registration and never widened afterwards.
//!
//! ## Key Types
//!
//! - [`AdminIdentity`]: `(namespace, name)` pair naming one administrator
//! - [`UserId`]: Managed user; user `0` is the owner user
//! - [`RemovalToken`]: Handle for a pending two-phase removal
//! - [`PolicyCapability`] / [`PolicyCapabilities`]: What an administrator
//!   may control

pub mod capability;
pub mod ids;

pub use capability::{CapabilityError, PolicyCapabilities, PolicyCapability};
pub use ids::{AdminIdentity, IdentityParseError, RemovalToken, UserId};
