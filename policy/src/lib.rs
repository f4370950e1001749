//! # Device Policy Model
//!
//! Per-administrator policy records and the pure aggregation that turns many
//! of them into one enforced value per policy dimension.
//!
//! ## Philosophy
//!
//! - **Many voices, one answer**: Every registered administrator may assert a
//!   constraint; the enforced value is a deterministic combination of all of
//!   them
//! - **Strictest wins**: A new administrator can tighten policy, never loosen
//!   it
//! - **Pure and testable**: Aggregation reads records and returns values; it
//!   owns no state and performs no I/O
//!
//! ## Core Concepts
//!
//! - `ActiveAdminRecord`: One administrator's asserted policy values
//! - `PasswordQuality`: Ordered password strength classes
//! - `PasswordComposition`: Measured or required character class counts
//! - `AggregatePolicy`: The combined value of every dimension
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A persistence layer (see `services_device_policy::persistence`)
//! - An enforcement point; callers push aggregates to their sinks
//! - A credential verifier

pub mod aggregate;
pub mod quality;
pub mod record;

pub use aggregate::{AggregatePolicy, PasswordShortfall, ProxyResolution};
pub use quality::{PasswordComposition, PasswordQuality, PolicyValueError};
pub use record::{ActiveAdminRecord, GlobalProxy, KeyguardFeatures, PasswordLimit, TimeLimit};
