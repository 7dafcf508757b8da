//! Domain layer for quench
//!
//! Core models, error types and the ports the services depend on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{AgentError, CacheError, CheckError, DomainError, DomainResult};
