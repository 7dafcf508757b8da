//! Quench - check orchestration with a convergent autofix loop
//!
//! Quench runs a batch of external code-quality checks under a worker budget,
//! memoizes their results by content, normalizes their output into issues and
//! drives fix agents over those issues until they converge or a budget runs out.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): runner, cache, strategies, orchestrator,
//!   parser, router, validator and the autofix coordinator
//! - **Adapters** (`adapters`): SQLite cache store and built-in fix agents
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    AutofixSummary, CheckDefinition, CheckResult, CheckStatus, CheckSuiteResult, Config, Issue,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{AutofixCoordinator, Orchestrator};
