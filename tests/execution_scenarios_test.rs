//! Stage execution against real subprocesses.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use quench::adapters::sqlite::{all_embedded_migrations, create_pool, database_url, Migrator, SqliteCacheStore};
use quench::domain::models::{CheckDefinition, CheckStatus, StrategyKind};
use quench::services::ResultCache;

use common::{orchestrator, paths, project};

fn sleeper(id: &str, secs: &str) -> CheckDefinition {
    CheckDefinition::new(id, vec!["sleep".into(), secs.into()])
}

#[tokio::test]
async fn parallel_stage_takes_the_longest_check_not_the_sum() {
    let dir = project(&[]);
    let orch = orchestrator(
        dir.path(),
        vec![sleeper("short", "1"), sleeper("long", "2")],
        StrategyKind::Parallel,
        2,
    );

    let started = Instant::now();
    let suite = orch.run_stage("default", &[], &CancellationToken::new()).await;
    let elapsed = started.elapsed();

    assert!(suite.passed);
    assert_eq!(suite.check_results.len(), 2);
    assert_eq!(suite.check_results[0].check_id, "short");
    assert_eq!(suite.check_results[1].check_id, "long");
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2800), "took {elapsed:?}");
}

#[tokio::test]
async fn adaptive_stage_matches_parallel_makespan() {
    let dir = project(&[]);
    let orch = orchestrator(
        dir.path(),
        vec![
            sleeper("a", "1").with_expected_duration_secs(1.0),
            sleeper("b", "1").with_expected_duration_secs(1.0),
            sleeper("c", "2").with_expected_duration_secs(2.0),
        ],
        StrategyKind::Adaptive,
        2,
    );

    let started = Instant::now();
    let suite = orch.run_stage("default", &[], &CancellationToken::new()).await;
    let elapsed = started.elapsed();

    assert!(suite.passed);
    let ids: Vec<_> = suite.check_results.iter().map(|r| r.check_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(elapsed < Duration::from_millis(2800), "took {elapsed:?}");
}

#[tokio::test]
async fn unchanged_content_is_served_from_the_sqlite_cache() {
    let dir = project(&[("a.py", "print('ok')\n")]);
    let pool = create_pool(&database_url(&dir.path().join(".quench/cache.db").to_string_lossy()), None)
        .await
        .unwrap();
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .unwrap();
    let cache = Arc::new(ResultCache::new(Arc::new(SqliteCacheStore::new(pool)), dir.path(), 10));

    let check = CheckDefinition::new(
        "counted",
        vec![
            "sh".into(),
            "-c".into(),
            "echo run >> .runs; cat \"$@\" > /dev/null".into(),
            "sh".into(),
            "{files}".into(),
        ],
    )
    .with_cacheable(true)
    .with_tool_version("1.0");
    let orch = orchestrator(dir.path(), vec![check], StrategyKind::Parallel, 2).with_cache(cache);
    let files = paths(&["a.py"]);
    let cancel = CancellationToken::new();

    let first = orch.run_stage("default", &files, &cancel).await;
    let second = orch.run_stage("default", &files, &cancel).await;

    assert!(first.cache_hits.is_empty());
    assert_eq!(second.cache_hits, vec!["counted".to_string()]);
    assert_eq!(common::read(dir.path(), ".runs").lines().count(), 1);

    let mut hit = second.check_results[0].clone();
    assert!(hit.cached);
    hit.cached = false;
    assert_eq!(hit, first.check_results[0]);

    common::write(dir.path(), "a.py", "print('changed')\n");
    let third = orch.run_stage("default", &files, &cancel).await;
    assert!(third.cache_hits.is_empty());
    assert_eq!(common::read(dir.path(), ".runs").lines().count(), 2);
}

#[tokio::test]
async fn missing_binary_errors_one_check_and_the_stage_continues() {
    let dir = project(&[]);
    let orch = orchestrator(
        dir.path(),
        vec![
            CheckDefinition::new("ghost", vec!["quench-no-such-tool-on-path".into()]),
            CheckDefinition::shell("fine", "exit 0"),
        ],
        StrategyKind::Parallel,
        2,
    );

    let suite = orch.run_stage("default", &[], &CancellationToken::new()).await;

    assert!(!suite.passed);
    let ghost = &suite.check_results[0];
    assert_eq!(ghost.status, CheckStatus::Error);
    assert!(ghost.error.as_deref().is_some_and(|e| e.contains("quench-no-such-tool-on-path")));
    assert_eq!(suite.check_results[1].status, CheckStatus::Passed);
}

#[tokio::test]
async fn long_sleep_is_terminated_at_its_timeout() {
    let dir = project(&[]);
    let orch = orchestrator(
        dir.path(),
        vec![sleeper("sleepy", "60").with_timeout_secs(5)],
        StrategyKind::Sequential,
        1,
    );

    let started = Instant::now();
    let suite = orch.run_stage("default", &[], &CancellationToken::new()).await;
    let elapsed = started.elapsed();

    assert_eq!(suite.check_results[0].status, CheckStatus::Timeout);
    assert!(!suite.passed);
    assert!(elapsed >= Duration::from_millis(4900));
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");
}

#[tokio::test]
async fn location_output_becomes_issues() {
    let dir = project(&[("src/a.py", "x = 1  \n"), ("src/b.py", "ok\n")]);
    let check = CheckDefinition::new(
        "trailing",
        vec![
            "sh".into(),
            "-c".into(),
            "! grep -Hn ' $' \"$@\" | sed 's/:[^:]*$/: W291 trailing whitespace/'".into(),
            "sh".into(),
            "{files}".into(),
        ],
    )
    .with_scope(&["src/*.py"]);
    let orch = orchestrator(dir.path(), vec![check], StrategyKind::Parallel, 2);

    let suite = orch
        .run_stage("default", &paths(&["src/a.py", "src/b.py", "README.md"]), &CancellationToken::new())
        .await;

    assert_eq!(suite.issues.len(), 1);
    let issue = &suite.issues[0];
    assert_eq!(issue.kind, "W291");
    assert_eq!(issue.line, Some(1));
    assert_eq!(issue.file(), Some(std::path::Path::new("src/a.py")));
    assert_eq!(suite.check_results[0].issue_count, 1);
}
