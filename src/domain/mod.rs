//! Domain layer - pure quota logic with no I/O.
//!
//! This layer contains the core concepts and invariants of quota enforcement:
//! - Accounts, plan limits and usage snapshots
//! - Externally-backed resources and their lifecycle
//! - The authoritative account status classifier
//! - Excess-resource selection rules
//! - Enforcement run audit records
//!
//! All types in this layer are pure and easily testable.

pub mod account;
pub mod resource;
pub mod run;
pub mod selection;
pub mod status;
pub mod usage;
