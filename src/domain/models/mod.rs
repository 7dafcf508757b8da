pub mod autofix;
pub mod check;
pub mod config;
pub mod events;
pub mod fix;
pub mod issue;
pub mod routing;

pub use autofix::{AutofixOutcome, AutofixState, AutofixSummary, IterationRecord};
pub use check::{
    CheckDefinition, CheckResult, CheckStatus, CheckSuiteResult, OutputFormat, ParseDiagnostic,
};
pub use config::{
    AutofixConfig, CacheConfig, Config, ExecutionConfig, LoggingConfig, RoutingConfig,
    StrategyKind, ValidationConfig,
};
pub use events::{EventEnvelope, QaEvent};
pub use fix::{FileEdit, Fix, FixProposal, IssueGroup, ValidationVerdict};
pub use issue::{Issue, Severity};
pub use routing::{AgentMetrics, InvocationOutcome, RoutedGroup, RoutingPlan};
