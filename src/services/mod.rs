//! Service layer: check execution, result memoization and the autofix loop.

pub mod agent_router;
pub mod autofix_coordinator;
pub mod check_registry;
pub mod event_bus;
pub mod execution_strategy;
pub mod orchestrator;
pub mod output_parser;
pub mod process_runner;
pub mod result_cache;
pub mod validator;

pub use agent_router::{message_signature, AgentRegistry, AgentRouter};
pub use autofix_coordinator::{is_stuck, next_state, AutofixCoordinator, LoopSignal};
pub use check_registry::CheckRegistry;
pub use event_bus::{EventBus, EventBusConfig};
pub use execution_strategy::{
    build_strategy, default_worker_budget, plan_slots, AdaptiveStrategy, DurationHistory,
    ExecutionStrategy, ParallelStrategy, SequentialStrategy,
};
pub use orchestrator::Orchestrator;
pub use output_parser::OutputParser;
pub use process_runner::{PhaseLimits, PollObservation, ProcessRunner, RunnerConfig, RunnerPhase};
pub use result_cache::{ResultCache, ToolVersionResolver};
pub use validator::{JsonChecker, PythonChecker, TomlChecker, Validator, YamlChecker};
