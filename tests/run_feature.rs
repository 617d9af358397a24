#![cfg(unix)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use wpflow::cli::RunArgs;
use wpflow::engine::RunOutcome;
use wpflow::run_feature;
use wpflow::state::{STATE_FILE_NAME, UnitStatus};
use wpflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

const MANIFEST: &str = r#"
[unit.WP01]
title = "Schema"

[unit.WP02]
title = "API"
dependencies = ["WP01"]
"#;

fn project(config: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("Wpflow.toml");
    fs::write(&config_path, config).unwrap();
    let feature = dir.path().join("kitty-specs").join("001-checkout");
    fs::create_dir_all(&feature).unwrap();
    fs::write(feature.join("units.toml"), MANIFEST).unwrap();
    (dir, config_path, feature)
}

fn args(feature_dir: &Path, dry_run: bool) -> RunArgs {
    RunArgs {
        feature_dir: feature_dir.to_path_buf(),
        fresh: false,
        dry_run,
    }
}

#[tokio::test]
async fn shell_agents_drive_feature_to_completion() -> TestResult {
    init_tracing();
    let (dir, config, feature) = project(
        r#"
[agents.shell]
implement_cmd = "echo \"$WPFLOW_FEATURE\" >> implemented-{unit}"
review_cmd = "test -f implemented-{unit}"
"#,
    );

    let report = run_feature(&config, &args(&feature, false))
        .await?
        .expect("not a dry run");

    assert_eq!(report.outcome, RunOutcome::Finished);
    assert!(report.all_completed());
    assert_eq!(report.feature_slug, "001-checkout");

    let marker = fs::read_to_string(dir.path().join("implemented-WP02"))?;
    assert_eq!(marker.trim(), "001-checkout");

    let control = dir.path().join(".wpflow");
    assert!(!control.join(STATE_FILE_NAME).exists());
    assert_eq!(fs::read_to_string(control.join("lanes/WP01"))?.trim(), "done");
    Ok(())
}

#[tokio::test]
async fn rejection_feedback_lands_next_to_lane() -> TestResult {
    init_tracing();
    // First review rejects with feedback, the second approves.
    let (dir, config, feature) = project(
        r#"
[orchestrator]
max_review_cycles = 2

[agents.shell]
implement_cmd = "true"
review_cmd = "if [ -f reviewed-{unit} ]; then exit 0; fi; touch reviewed-{unit}; echo 'tighten validation'; exit 1"
"#,
    );

    let report = run_feature(&config, &args(&feature, false))
        .await?
        .expect("not a dry run");

    assert!(report.all_completed());
    assert_eq!(report.unit("WP01").unwrap().review_cycles, 1);
    let feedback = fs::read_to_string(dir.path().join(".wpflow/lanes/WP01.feedback"))?;
    assert_eq!(feedback, "tighten validation\n");
    Ok(())
}

#[tokio::test]
async fn failing_agent_fails_unit_and_its_dependent() -> TestResult {
    init_tracing();
    let (dir, config, feature) = project(
        r#"
[agents.shell]
implement_cmd = "test {unit} != WP01"
review_cmd = "true"
"#,
    );

    let report = run_feature(&config, &args(&feature, false))
        .await?
        .expect("not a dry run");

    // Every unit terminal: the run finished, but not successfully.
    assert_eq!(report.outcome, RunOutcome::Finished);
    assert_eq!(report.status_of("WP01"), Some(UnitStatus::Failed));
    assert_eq!(report.status_of("WP02"), Some(UnitStatus::Failed));
    assert!(
        report.unit("WP01").unwrap().last_error.as_deref().unwrap().contains("exited with code 1")
    );
    assert!(!dir.path().join(".wpflow").join(STATE_FILE_NAME).exists());
    Ok(())
}

#[tokio::test]
async fn dry_run_touches_nothing() -> TestResult {
    init_tracing();
    let (dir, config, feature) = project("[agents.shell]\n");

    let report = run_feature(&config, &args(&feature, true)).await?;

    assert!(report.is_none());
    assert!(!dir.path().join(".wpflow").exists());
    Ok(())
}
