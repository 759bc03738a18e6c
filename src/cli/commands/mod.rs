//! CLI command implementations.

pub mod analyze;
pub mod limits;
pub mod validate;
