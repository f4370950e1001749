//! Identifiers for users, administrators and pending removals

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a managed user
///
/// User `0` is the owner (primary) user. Device-global settings such as the
/// global proxy and storage encryption can only be driven from it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UserId(u32);

impl UserId {
    /// The owner user
    pub const OWNER: UserId = UserId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_owner(&self) -> bool {
        *self == Self::OWNER
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Structured name of one administrator
///
/// The namespace is the package the administrator ships in; the name is the
/// receiver component inside it. Ordering is lexicographic on
/// `(namespace, name)`, which keeps every map keyed by identity
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AdminIdentity {
    namespace: String,
    name: String,
}

/// Error returned when a flattened identity cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed admin identity: {input:?}")]
pub struct IdentityParseError {
    pub input: String,
}

impl AdminIdentity {
    const SEPARATOR: char = '/';

    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Package the administrator belongs to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Receiver component within the package
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the identity survives a `flatten`/`unflatten` round trip
    ///
    /// Both parts must be non-empty and free of the `/` separator.
    pub fn is_well_formed(&self) -> bool {
        let part_ok = |part: &str| !part.is_empty() && !part.contains(Self::SEPARATOR);
        part_ok(&self.namespace) && part_ok(&self.name)
    }

    /// Renders the identity as `namespace/name`
    pub fn flatten(&self) -> String {
        format!("{}{}{}", self.namespace, Self::SEPARATOR, self.name)
    }

    /// Parses the `namespace/name` form produced by [`AdminIdentity::flatten`]
    pub fn unflatten(flat: &str) -> Result<Self, IdentityParseError> {
        let err = || IdentityParseError {
            input: flat.to_string(),
        };
        let (namespace, name) = flat.split_once(Self::SEPARATOR).ok_or_else(err)?;
        if namespace.is_empty() || name.is_empty() || name.contains(Self::SEPARATOR) {
            return Err(err());
        }
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for AdminIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for AdminIdentity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::unflatten(s)
    }
}

/// Handle for an administrator removal that awaits acknowledgement
///
/// Issued by the first phase of a removal and redeemed by the second. A token
/// is only valid for the removal that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemovalToken(Uuid);

impl RemovalToken {
    /// Creates a new random removal token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RemovalToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RemovalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Removal({})", self.0)
    }
}
