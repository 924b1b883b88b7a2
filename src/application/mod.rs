//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages runtime behavior:
//! - Usage aggregation from the usage log
//! - Limit mutation under per-account serialization
//! - Reconciliation of marked resources against the external provider
//! - Enforcement sweeps and their audit records
//! - The administrative surface
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from storage and provider details.

pub mod admin;
pub mod aggregator;
pub mod circuit_breaker;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod mutator;
pub mod ports;
pub mod reconciler;
pub mod scheduler;
