mod common;

use assert_matches::assert_matches;
use quickcheck_macros::quickcheck;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use orgbackup::{BackupOrchestrator, RepoFilters, RunOutcome, TaskStatus};

fn orchestrator(
    repos: &[&str],
    targets: &[Arc<MockTarget>],
    reporter: Arc<RecordingReporter>,
) -> BackupOrchestrator {
    BackupOrchestrator::new(InMemorySource::new(repositories(repos)), target_map(targets), reporter)
}

#[tokio::test]
async fn test_failing_target_does_not_affect_siblings() {
    let good = MockTarget::new("a", Behavior::Succeed);
    let bad = MockTarget::new("b", Behavior::Fail);
    let reporter = RecordingReporter::new();

    let outcome = orchestrator(&["r1", "r2"], &[good.clone(), bad.clone()], reporter.clone())
        .run(false)
        .await
        .unwrap();

    let summary = assert_matches!(outcome, RunOutcome::Completed(summary) => summary);
    assert_eq!(summary.total, 4);
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.per_target["a"].success, 2);
    assert_eq!(summary.per_target["b"].failed, 2);

    let r2_on_a = summary
        .results
        .iter()
        .find(|o| o.repository == "r2" && o.target == "a")
        .unwrap();
    assert_eq!(r2_on_a.status, TaskStatus::Success);

    let r1_on_b = summary
        .results
        .iter()
        .find(|o| o.repository == "r1" && o.target == "b")
        .unwrap();
    assert_eq!(r1_on_b.status, TaskStatus::Error);
    assert!(r1_on_b.error.as_deref().unwrap().contains("rejected r1"));

    assert_eq!(reporter.summary_count(), 1);
}

#[tokio::test]
async fn test_dry_run_skips_targets_and_reporter() {
    let target = MockTarget::new("a", Behavior::Succeed);
    let reporter = RecordingReporter::new();

    let outcome = orchestrator(&["r1", "r2", "r3"], &[target.clone()], reporter.clone())
        .run(true)
        .await
        .unwrap();

    let summary = outcome.summary().unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.dry_run, 3);
    assert!(summary.results.iter().all(|o| o.status == TaskStatus::DryRun));
    assert_eq!(target.call_count(), 0);
    assert_eq!(reporter.summary_count(), 0);
}

#[tokio::test]
async fn test_no_repositories() {
    let target = MockTarget::new("a", Behavior::Succeed);
    let reporter = RecordingReporter::new();

    let outcome = orchestrator(&[], &[target.clone()], reporter.clone())
        .run(false)
        .await
        .unwrap();

    assert_matches!(outcome, RunOutcome::NoRepositories);
    assert_eq!(target.call_count(), 0);
    assert_eq!(reporter.summary_count(), 0);
}

#[tokio::test]
async fn test_no_enabled_targets() {
    let disabled = MockTarget::with_enabled("a", Behavior::Succeed, false);
    let reporter = RecordingReporter::new();

    let outcome = orchestrator(&["r1"], &[disabled.clone()], reporter.clone())
        .run(false)
        .await
        .unwrap();

    assert_matches!(outcome, RunOutcome::NoTargets);
    assert_eq!(outcome.status(), "no_targets");
    assert_eq!(disabled.call_count(), 0);
    assert_eq!(reporter.summary_count(), 0);
}

#[tokio::test]
async fn test_disabled_targets_are_not_planned() {
    let enabled = MockTarget::new("a", Behavior::Succeed);
    let disabled = MockTarget::with_enabled("b", Behavior::Succeed, false);

    let outcome = orchestrator(&["r1", "r2"], &[enabled.clone(), disabled.clone()], RecordingReporter::new())
        .run(false)
        .await
        .unwrap();

    let summary = outcome.summary().unwrap();
    assert_eq!(summary.total, 2);
    assert!(!summary.per_target.contains_key("b"));
    assert_eq!(disabled.call_count(), 0);
}

#[tokio::test]
async fn test_panicking_target_becomes_error_outcome() {
    let good = MockTarget::new("a", Behavior::Succeed);
    let buggy = MockTarget::new("b", Behavior::Panic);

    let outcome = orchestrator(&["r1", "r2"], &[good, buggy], RecordingReporter::new())
        .run(false)
        .await
        .unwrap();

    let summary = outcome.summary().unwrap();
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 2);
    for failure in summary.failures() {
        assert_eq!(failure.target, "b");
        assert!(failure.error.as_deref().unwrap().contains("panicked"));
    }
}

#[tokio::test]
async fn test_hung_target_times_out() {
    let good = MockTarget::new("a", Behavior::Succeed);
    let hung = MockTarget::new("b", Behavior::Hang);

    let outcome = orchestrator(&["r1"], &[good, hung], RecordingReporter::new())
        .with_task_timeout(Duration::from_millis(100))
        .run(false)
        .await
        .unwrap();

    let summary = outcome.summary().unwrap();
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 1);
    let failure = summary.failures().next().unwrap();
    assert_eq!(failure.target, "b");
    assert!(failure.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_discovery_error_fails_run() {
    let target = MockTarget::new("a", Behavior::Succeed);
    let reporter = RecordingReporter::new();
    let orchestrator = BackupOrchestrator::new(
        Arc::new(UnreachableSource),
        target_map(&[target.clone()]),
        reporter.clone(),
    );

    let err = orchestrator.run(false).await.unwrap_err();
    assert!(format!("{:#}", err).contains("connection refused"));
    assert_eq!(target.call_count(), 0);
    assert_eq!(reporter.summary_count(), 0);
}

#[tokio::test]
async fn test_filters_are_passed_to_source() {
    let target = MockTarget::new("a", Behavior::Succeed);
    let filters = RepoFilters::new(true, false, false, &["a-.*".to_string()], &[]).unwrap();

    let outcome = orchestrator(&["a-lib", "a-test", "b-lib"], &[target.clone()], RecordingReporter::new())
        .with_filters(filters)
        .run(false)
        .await
        .unwrap();

    assert_eq!(outcome.summary().unwrap().total, 1);
    assert_eq!(*target.seen.lock().unwrap(), vec!["b-lib".to_string()]);
}

#[tokio::test]
async fn test_each_pair_runs_exactly_once() {
    let a = MockTarget::new("a", Behavior::Succeed);
    let b = MockTarget::new("b", Behavior::Fail);
    let names = ["r1", "r2", "r3", "r4", "r5"];

    let outcome = orchestrator(&names, &[a.clone(), b.clone()], RecordingReporter::new())
        .with_max_concurrent(2)
        .run(false)
        .await
        .unwrap();

    let summary = outcome.summary().unwrap();
    let pairs: HashSet<(String, String)> = summary
        .results
        .iter()
        .map(|o| (o.repository.clone(), o.target.clone()))
        .collect();
    assert_eq!(pairs.len(), 10);
    assert_eq!(a.call_count(), 5);
    assert_eq!(b.call_count(), 5);
}

/// N enabled targets and M repositories always give N x M outcomes whose
/// counts add up
#[quickcheck]
fn prop_outcome_count_is_cross_product(repo_count: u8, target_count: u8, failing_mask: u8) -> bool {
    let repo_count = (repo_count % 8) as usize;
    let target_count = (target_count % 4) as usize;

    let names: Vec<String> = (0..repo_count).map(|i| format!("repo-{}", i)).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let targets: Vec<Arc<MockTarget>> = (0..target_count)
        .map(|i| {
            let behavior = if failing_mask & (1 << i) != 0 {
                Behavior::Fail
            } else {
                Behavior::Succeed
            };
            MockTarget::new(&format!("t{}", i), behavior)
        })
        .collect();

    let outcome = tokio_test::block_on(
        orchestrator(&name_refs, &targets, RecordingReporter::new()).run(false),
    )
    .unwrap();

    match outcome {
        RunOutcome::NoRepositories => repo_count == 0,
        RunOutcome::NoTargets => repo_count > 0 && target_count == 0,
        RunOutcome::Completed(summary) => {
            summary.total == repo_count * target_count
                && summary.results.len() == summary.total
                && summary.successful + summary.failed + summary.dry_run == summary.total
        }
    }
}
