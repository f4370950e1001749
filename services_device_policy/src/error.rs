//! Error types for the policy service

use core_types::{AdminIdentity, PolicyCapability, RemovalToken, UserId};
use policy::PolicyValueError;
use services_storage::StorageError;
use thiserror::Error;

use crate::persistence::CodecError;

/// Broad class of a [`PolicyError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was refused; nothing changed
    Caller,
    /// Persistence failed; in-memory state was kept equal to the last
    /// durable state
    Storage,
    /// Stored policy is self-contradictory and needs resolution
    InconsistentAggregate,
}

/// Errors returned by policy service operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("admin {admin} is not active for {user}")]
    UnknownAdmin { user: UserId, admin: AdminIdentity },

    #[error("admin {admin} does not hold the {capability} capability")]
    MissingCapability {
        admin: AdminIdentity,
        capability: PolicyCapability,
    },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Value(#[from] PolicyValueError),

    #[error("admin {0} is already registered")]
    AlreadyRegistered(AdminIdentity),

    #[error("admin {0} has a removal pending")]
    RemovalPending(AdminIdentity),

    #[error("unknown removal token {0}")]
    UnknownRemovalToken(RemovalToken),

    #[error("admin {admin} is not installed for {user}")]
    NotInstalled { user: UserId, admin: AdminIdentity },

    #[error("package {0} is not installed")]
    PackageNotInstalled(String),

    #[error("device is already provisioned")]
    AlreadyProvisioned,

    #[error("device owner is already set to {0}")]
    DeviceOwnerAlreadySet(String),

    #[error("profile owner is already set for {0}")]
    ProfileOwnerAlreadySet(UserId),

    #[error("setup is already complete for {0}")]
    UserSetupComplete(UserId),

    #[error("{0} is not the device owner")]
    NotDeviceOwner(String),

    #[error("{0} is neither device owner nor profile owner of {1}")]
    NotOwner(String, UserId),

    #[error("operation is only allowed for the owner user, not {0}")]
    NotOwnerUser(UserId),

    #[error("device owner admin {0} cannot be removed")]
    DeviceOwnerNotRemovable(AdminIdentity),

    #[error("global proxy is already set by {0}")]
    ConflictingGlobalProxy(AdminIdentity),

    #[error("password rejected: {0}")]
    PasswordRejected(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("several admins claim the global proxy: {0:?}")]
    InconsistentGlobalProxy(Vec<AdminIdentity>),
}

impl PolicyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PolicyError::Storage(_) | PolicyError::Codec(_) => ErrorKind::Storage,
            PolicyError::InconsistentGlobalProxy(_) => ErrorKind::InconsistentAggregate,
            _ => ErrorKind::Caller,
        }
    }
}

pub type PolicyResult<T> = Result<T, PolicyError>;
