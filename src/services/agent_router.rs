//! Issue-to-agent routing.
//!
//! Each issue goes to the registered agent with the highest confidence for
//! it, ties broken by declared priority and then by id. Routed issues are
//! grouped per (agent, kind) and, for batch-capable agents, per file.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentMetrics, InvocationOutcome, Issue, IssueGroup, RoutedGroup, RoutingConfig, RoutingPlan,
};
use crate::domain::ports::FixAgent;

fn quoted_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"'[^']*'|"[^"]*"|`[^`]*`"#).ok()).as_ref()
}

fn digits_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()
}

/// Normalized message signature used as the solution cache key.
///
/// Lower-cases, replaces quoted spans with `<q>` and digit runs with `#`,
/// and collapses whitespace.
pub fn message_signature(message: &str) -> String {
    let mut signature = message.to_lowercase();
    if let Some(re) = quoted_regex() {
        signature = re.replace_all(&signature, "<q>").into_owned();
    }
    if let Some(re) = digits_regex() {
        signature = re.replace_all(&signature, "#").into_owned();
    }
    signature.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

/// Closed set of fix agents, populated once at startup.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn FixAgent>>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    /// Build a registry, rejecting duplicate agent ids.
    pub fn new(agents: Vec<Arc<dyn FixAgent>>) -> DomainResult<Self> {
        let mut index = HashMap::with_capacity(agents.len());
        for (i, agent) in agents.iter().enumerate() {
            if index.insert(agent.id().to_string(), i).is_some() {
                return Err(DomainError::ValidationFailed(format!(
                    "duplicate agent id '{}'",
                    agent.id()
                )));
            }
        }
        Ok(Self { agents, index })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn FixAgent>> {
        self.index.get(id).map(|&i| &self.agents[i])
    }

    /// Agents whose declared kinds cover `kind`, in registration order.
    pub fn candidates<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Arc<dyn FixAgent>> + 'a {
        self.agents.iter().filter(move |a| a.covers(kind))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// ---------------------------------------------------------------------------
// AgentRouter
// ---------------------------------------------------------------------------

type SolutionKey = (String, String);

#[derive(PartialEq, Eq, Hash)]
enum GroupKey {
    Batch {
        agent_id: String,
        kind: String,
        file: String,
        cached: bool,
    },
    Single(usize),
}

/// Maps issues to fix agents.
///
/// The solution cache and metrics live for one top-level run and are
/// cleared by [`AgentRouter::reset_run_state`].
pub struct AgentRouter {
    registry: Arc<AgentRegistry>,
    config: RoutingConfig,
    solutions: RwLock<HashMap<SolutionKey, String>>,
    metrics: RwLock<HashMap<String, AgentMetrics>>,
}

impl AgentRouter {
    pub fn new(registry: Arc<AgentRegistry>, config: RoutingConfig) -> Self {
        Self {
            registry,
            config,
            solutions: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    /// Clear the solution cache and metrics before a new run.
    pub async fn reset_run_state(&self) {
        self.solutions.write().await.clear();
        self.metrics.write().await.clear();
    }

    fn clears_threshold(&self, confidence: f64) -> bool {
        confidence > 0.0 && confidence >= self.config.min_confidence
    }

    /// Pick the best agent for one issue, if any clears the threshold.
    pub fn select(&self, issue: &Issue) -> Option<(Arc<dyn FixAgent>, f64)> {
        let mut best: Option<(&Arc<dyn FixAgent>, f64)> = None;
        for agent in self.registry.candidates(&issue.kind) {
            let confidence = clamp_confidence(agent.can_handle(issue));
            if !self.clears_threshold(confidence) {
                continue;
            }
            let better = best.map_or(true, |(current, current_conf)| {
                confidence
                    .total_cmp(&current_conf)
                    .then(agent.priority().cmp(&current.priority()))
                    .then(current.id().cmp(agent.id()))
                    .is_gt()
            });
            if better {
                best = Some((agent, confidence));
            }
        }
        best.map(|(agent, confidence)| (agent.clone(), confidence))
    }

    /// Route `issues` into agent groups.
    pub async fn route(&self, issues: &[Issue]) -> RoutingPlan {
        let solutions = self.solutions.read().await;
        let mut plan = RoutingPlan::default();
        let mut group_index: HashMap<GroupKey, usize> = HashMap::new();

        for (n, issue) in issues.iter().enumerate() {
            let cached = if self.config.solution_cache_enabled {
                solutions
                    .get(&(issue.kind.clone(), message_signature(&issue.message)))
                    .and_then(|agent_id| self.registry.get(agent_id))
                    .filter(|agent| agent.covers(&issue.kind))
                    .map(|agent| (agent.clone(), clamp_confidence(agent.can_handle(issue))))
                    .filter(|(_, confidence)| self.clears_threshold(*confidence))
            } else {
                None
            };
            let from_cache = cached.is_some();

            let Some((agent, confidence)) = cached.or_else(|| self.select(issue)) else {
                tracing::debug!(issue_id = %issue.id, kind = %issue.kind, "no agent above threshold");
                plan.unroutable.push(issue.clone());
                continue;
            };

            let key = match issue.file() {
                Some(file) if agent.supports_batch() => GroupKey::Batch {
                    agent_id: agent.id().to_string(),
                    kind: issue.kind.clone(),
                    file: file.to_string_lossy().into_owned(),
                    cached: from_cache,
                },
                _ => GroupKey::Single(n),
            };

            match group_index.get(&key) {
                Some(&i) => {
                    let routed = &mut plan.routed[i];
                    routed.group.issues.push(issue.clone());
                    routed.confidence = routed.confidence.min(confidence);
                }
                None => {
                    let group = IssueGroup::single(issue.clone());
                    group_index.insert(key, plan.routed.len());
                    plan.routed.push(RoutedGroup {
                        group,
                        agent_id: agent.id().to_string(),
                        confidence,
                        from_solution_cache: from_cache,
                    });
                }
            }
        }

        tracing::debug!(
            groups = plan.routed.len(),
            routed = plan.routed_issue_count(),
            unroutable = plan.unroutable.len(),
            "routing complete"
        );
        plan
    }

    /// Record how an invocation for `routed` ended.
    ///
    /// Accepted fixes seed the solution cache with the group's signatures.
    pub async fn record_outcome(&self, routed: &RoutedGroup, outcome: InvocationOutcome) {
        self.metrics
            .write()
            .await
            .entry(routed.agent_id.clone())
            .or_default()
            .record(outcome, routed.confidence);

        if outcome == InvocationOutcome::Accepted && self.config.solution_cache_enabled {
            let mut solutions = self.solutions.write().await;
            for issue in &routed.group.issues {
                solutions.insert(
                    (issue.kind.clone(), message_signature(&issue.message)),
                    routed.agent_id.clone(),
                );
            }
        }
    }

    /// Snapshot of per-agent metrics for this run.
    pub async fn metrics(&self) -> BTreeMap<String, AgentMetrics> {
        self.metrics
            .read()
            .await
            .iter()
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect()
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::AgentError;
    use crate::domain::models::FixProposal;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct StubAgent {
        id: String,
        kinds: Vec<String>,
        confidence: f64,
        priority: i32,
        batch: bool,
        /// Per-message confidence, matched by substring.
        by_message: Vec<(&'static str, f64)>,
    }

    impl StubAgent {
        fn new(id: &str, kinds: &[&str], confidence: f64) -> Self {
            Self {
                id: id.into(),
                kinds: kinds.iter().map(|k| (*k).to_string()).collect(),
                confidence,
                priority: 0,
                batch: false,
                by_message: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl FixAgent for StubAgent {
        fn id(&self) -> &str {
            &self.id
        }
        fn kinds(&self) -> &[String] {
            &self.kinds
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn supports_batch(&self) -> bool {
            self.batch
        }
        fn can_handle(&self, issue: &Issue) -> f64 {
            self.by_message
                .iter()
                .find(|(needle, _)| issue.message.contains(needle))
                .map_or(self.confidence, |(_, confidence)| *confidence)
        }
        async fn fix(&self, _: &IssueGroup, _: &BTreeMap<PathBuf, String>) -> Result<FixProposal, AgentError> {
            Ok(FixProposal::none("stub"))
        }
    }

    fn router(agents: Vec<StubAgent>) -> AgentRouter {
        let agents = agents.into_iter().map(|a| Arc::new(a) as Arc<dyn FixAgent>).collect();
        AgentRouter::new(Arc::new(AgentRegistry::new(agents).unwrap()), RoutingConfig::default())
    }

    fn issue(kind: &str, file: &str, line: u32, message: &str) -> Issue {
        Issue::new("lint", kind, message).at(file, Some(line), None)
    }

    #[test]
    fn test_signature_normalization() {
        assert_eq!(
            message_signature("Unused import 'os'  at line 12"),
            message_signature("unused IMPORT \"sys\" at line 7")
        );
        assert_eq!(message_signature("Line  too long (88 > 79)"), "line too long (# > #)");
    }

    #[tokio::test]
    async fn test_highest_confidence_then_priority_then_id() {
        let mut high_priority = StubAgent::new("b-agent", &["E1"], 0.8);
        high_priority.priority = 5;
        let r = router(vec![
            StubAgent::new("c-agent", &["E1"], 0.8),
            high_priority,
            StubAgent::new("a-agent", &["*"], 0.6),
        ]);

        let plan = r.route(&[issue("E1", "a.py", 1, "x")]).await;
        assert_eq!(plan.routed[0].agent_id, "b-agent");

        let r = router(vec![StubAgent::new("zeta", &["E1"], 0.7), StubAgent::new("alpha", &["E1"], 0.7)]);
        let plan = r.route(&[issue("E1", "a.py", 1, "x")]).await;
        assert_eq!(plan.routed[0].agent_id, "alpha");
    }

    #[tokio::test]
    async fn test_below_threshold_is_unroutable() {
        let r = router(vec![StubAgent::new("weak", &["E1"], 0.3), StubAgent::new("other", &["W2"], 0.9)]);
        let plan = r.route(&[issue("E1", "a.py", 1, "x")]).await;

        assert!(plan.routed.is_empty());
        assert_eq!(plan.unroutable.len(), 1);
    }

    #[tokio::test]
    async fn test_grouping_by_file_for_batch_agents() {
        let mut batch = StubAgent::new("batch", &["W291"], 0.9);
        batch.batch = true;
        let r = router(vec![batch, StubAgent::new("single", &["E501"], 0.9)]);

        let plan = r
            .route(&[
                issue("W291", "a.py", 1, "trailing"),
                issue("W291", "a.py", 4, "trailing"),
                issue("W291", "b.py", 2, "trailing"),
                issue("E501", "a.py", 3, "long"),
                issue("E501", "a.py", 9, "long"),
            ])
            .await;

        let sizes: Vec<(String, usize)> = plan.routed.iter().map(|g| (g.agent_id.clone(), g.group.len())).collect();
        assert_eq!(
            sizes,
            vec![
                ("batch".to_string(), 2),
                ("batch".to_string(), 1),
                ("single".to_string(), 1),
                ("single".to_string(), 1),
            ]
        );
        assert_eq!(plan.routed_issue_count(), 5);
    }

    #[tokio::test]
    async fn test_solution_cache_and_metrics_reset() {
        let r = router(vec![StubAgent::new("fixer", &["E1"], 0.9)]);
        let first = r.route(&[issue("E1", "a.py", 1, "bad name 'foo'")]).await;
        assert!(!first.routed[0].from_solution_cache);

        r.record_outcome(&first.routed[0], InvocationOutcome::Accepted).await;
        let again = r.route(&[issue("E1", "b.py", 8, "bad name 'bar'")]).await;
        assert!(again.routed[0].from_solution_cache);
        assert_eq!(r.metrics().await["fixer"].successes, 1);

        r.reset_run_state().await;
        let fresh = r.route(&[issue("E1", "b.py", 8, "bad name 'bar'")]).await;
        assert!(!fresh.routed[0].from_solution_cache);
        assert!(r.metrics().await.is_empty());
    }

    #[tokio::test]
    async fn test_solution_cache_respects_threshold() {
        let mut fixer = StubAgent::new("fixer", &["E1"], 0.9);
        fixer.by_message = vec![("'bar'", 0.1), ("'baz'", 0.2)];
        let mut fallback = StubAgent::new("fallback", &["E1"], 0.0);
        fallback.by_message = vec![("'baz'", 0.7)];
        let r = router(vec![fixer, fallback]);

        let first = r.route(&[issue("E1", "a.py", 1, "bad name 'foo'")]).await;
        r.record_outcome(&first.routed[0], InvocationOutcome::Accepted).await;

        let low = r.route(&[issue("E1", "b.py", 2, "bad name 'bar'")]).await;
        assert!(low.routed.is_empty());
        assert_eq!(low.unroutable.len(), 1);

        let other = r.route(&[issue("E1", "c.py", 3, "bad name 'baz'")]).await;
        assert_eq!(other.routed[0].agent_id, "fallback");
        assert!(!other.routed[0].from_solution_cache);
        assert!(other.routed[0].confidence >= r.min_confidence());
    }

    #[test]
    fn test_duplicate_agent_ids_rejected() {
        let agents: Vec<Arc<dyn FixAgent>> = vec![
            Arc::new(StubAgent::new("x", &["E1"], 0.9)),
            Arc::new(StubAgent::new("x", &["E2"], 0.9)),
        ];
        assert!(AgentRegistry::new(agents).is_err());
    }
}
