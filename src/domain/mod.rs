//! Domain layer for the swarmgate governance core
//!
//! Pure models, invariants and the ports strategies depend on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
