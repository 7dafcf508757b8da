//! Configuration-to-components wiring, as the CLI performs it.

mod common;

use tokio_util::sync::CancellationToken;

use quench::cli::context::{discover_files, AppContext};
use quench::cli::Cli;
use quench::infrastructure::config::ConfigLoader;

use clap::Parser;

const CONFIG: &str = r#"
execution:
  strategy: sequential
  poll_interval_ms: 20
cache:
  enabled: true
checks:
  - id: markers
    command: ["sh", "-c", "! grep -Hn TODO \"$@\"", "sh", "{files}"]
    issue_kind: marker
    cacheable: true
    tool_version: "1"
    scope: ["*.txt"]
"#;

#[tokio::test]
async fn configured_stage_runs_and_caches_on_disk() {
    let dir = common::project(&[
        (".quench/config.yaml", CONFIG),
        ("a.txt", "TODO\n"),
        ("b.txt", "fine\n"),
    ]);
    let config = ConfigLoader::load(dir.path()).unwrap();
    let ctx = AppContext::build(dir.path(), config).await.unwrap();
    let files = discover_files(dir.path()).unwrap();
    let cancel = CancellationToken::new();

    let first = ctx.orchestrator.run_stage("default", &files, &cancel).await;
    assert!(!first.passed);
    assert_eq!(first.issues.len(), 1);
    assert_eq!(first.issues[0].kind, "marker");

    let second = ctx.orchestrator.run_stage("default", &files, &cancel).await;
    assert_eq!(second.cache_hits, vec!["markers".to_string()]);
    assert_eq!(second.issues, first.issues);
    assert!(dir.path().join(".quench/cache.db").exists());
}

#[tokio::test]
async fn env_override_sets_worker_budget() {
    let dir = common::project(&[(".quench/config.yaml", CONFIG)]);
    let config = temp_env::with_var("QUENCH_EXECUTION__WORKER_BUDGET", Some("3"), || {
        ConfigLoader::load(dir.path()).unwrap()
    });
    let ctx = AppContext::build(dir.path(), config).await.unwrap();

    assert_eq!(ctx.orchestrator.worker_budget(), 3);
    assert_eq!(ctx.orchestrator.registry().len(), 1);
}

#[test]
fn cli_accepts_global_flags_after_subcommand() {
    let cli = Cli::parse_from(["quench", "checks", "--json", "--root", "/tmp"]);
    assert!(cli.json);
    assert_eq!(cli.root, std::path::PathBuf::from("/tmp"));
}
