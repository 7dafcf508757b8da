//! Port trait definitions (Hexagonal Architecture)
//!
//! Services depend only on these traits:
//! - CheckExecutor: runs one check invocation
//! - FixAgent: proposes fixes for routed issues
//! - CacheStore: persists memoized check results
//! - FileKindChecker: well-formedness check for one kind of file

pub mod cache_store;
pub mod check_executor;
pub mod file_kind_checker;
pub mod fix_agent;

pub use cache_store::CacheStore;
pub use check_executor::CheckExecutor;
pub use file_kind_checker::FileKindChecker;
pub use fix_agent::FixAgent;
