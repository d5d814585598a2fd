//! Integration tests for the repair loop's stopping rules, rollback, and
//! cancellation, driven by scripted smoke runs.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use common::{
    read_file, scenarios, server_error, smoke_run, target, temp_dir, write_file, EditingFallback,
    ScriptedHarness, Step,
};
use patchloop::adapters::memory::InMemoryPatternStore;
use patchloop::domain::errors::DomainError;
use patchloop::domain::models::{
    ApplicationIr, MutationResult, RepairConfig, RepairEvent, RepairStatus, Violation,
};
use patchloop::domain::ports::PatternStore;
use patchloop::services::{Engine, RepairOrchestrator};

const MAIN_PY: &str = "from fastapi import FastAPI\n\napp = FastAPI()\n";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn engine(config: &RepairConfig, store: &Arc<InMemoryPatternStore>) -> Engine {
    let store: Arc<dyn PatternStore> = Arc::clone(store) as Arc<dyn PatternStore>;
    Engine::new(config, Arc::new(ApplicationIr::default()), store)
}

fn resources(range: std::ops::Range<usize>) -> Vec<Violation> {
    range.map(|i| server_error(&format!("/resource{i}/{{id}}"))).collect()
}

fn drain(rx: &mut mpsc::Receiver<RepairEvent>) -> Vec<RepairEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Stopping rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn plateau_stops_as_converged() {
    let dir = temp_dir();
    write_file(dir.path(), "app/main.py", MAIN_PY);
    let harness = Arc::new(ScriptedHarness::new(vec![
        Step::Run(smoke_run(8, &resources(0..12))),
        Step::Run(smoke_run(11, &resources(0..9))),
        Step::Run(smoke_run(11, &resources(0..9))),
    ]));
    let config = RepairConfig::default();
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);

    let result = RepairOrchestrator::new(Arc::clone(&harness), config)
        .run(&mut engine, &target(dir.path()), &scenarios(&["a"]), None)
        .await
        .unwrap();

    assert_eq!(result.status, RepairStatus::Converged);
    assert!(result.convergence_detected);
    assert!(!result.target_reached);
    assert_eq!(result.iterations.len(), 3);
    assert!((result.initial_pass_rate - 0.40).abs() < 1e-9);
    assert!((result.final_pass_rate - 0.55).abs() < 1e-9);

    // No fallback and no source to patch: every attempt is recorded as failed.
    assert_eq!(result.total_repairs, 0);
    assert!(!result.fixes_applied.is_empty());
    assert!(result
        .fixes_applied
        .iter()
        .all(|f| !f.success && f.failure_reason.as_deref() == Some("Fallback repair disabled")));
    assert_eq!(harness.rebuilds(), 0);
    assert_eq!(result.unresolved.len(), 9);
    assert_eq!(read_file(dir.path(), "app/main.py"), MAIN_PY);
}

#[tokio::test]
async fn passing_suite_is_left_untouched() {
    let dir = temp_dir();
    write_file(dir.path(), "app/main.py", MAIN_PY);
    let harness = Arc::new(ScriptedHarness::new(vec![Step::Run(smoke_run(5, &[]))]));
    let fallback = Arc::new(EditingFallback::new("app/main.py"));
    let config = RepairConfig::default();
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);

    let result = RepairOrchestrator::new(Arc::clone(&harness), config)
        .with_fallback(fallback.clone())
        .run(&mut engine, &target(dir.path()), &scenarios(&["a"]), None)
        .await
        .unwrap();

    assert_eq!(result.status, RepairStatus::TargetReached);
    assert!(result.target_reached);
    assert_eq!(result.iterations.len(), 1);
    assert_eq!(result.initial_pass_rate, 1.0);
    assert!(result.fixes_applied.is_empty());
    assert!(result.mutations.is_empty());
    assert!(result.unresolved.is_empty());
    assert_eq!(fallback.calls(), 0);
    assert_eq!(harness.rebuilds(), 0);
    assert_eq!(read_file(dir.path(), "app/main.py"), MAIN_PY);
}

#[tokio::test]
async fn alternating_violation_sets_stop_as_cycle() {
    let dir = temp_dir();
    write_file(dir.path(), "app/main.py", MAIN_PY);
    let a = server_error("/orders/{id}");
    let b = server_error("/customers/{id}");
    let harness = Arc::new(ScriptedHarness::new(vec![
        Step::Run(smoke_run(1, &[a.clone()])),
        Step::Run(smoke_run(1, &[b])),
        Step::Run(smoke_run(1, &[a])),
    ]));
    let config = RepairConfig {
        convergence_epsilon: 0.0,
        ..RepairConfig::default()
    };
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);

    let result = RepairOrchestrator::new(harness, config)
        .run(&mut engine, &target(dir.path()), &scenarios(&["a", "b"]), None)
        .await
        .unwrap();

    assert_eq!(result.status, RepairStatus::CycleDetected);
    assert!(result.cycle_detected);
    assert_eq!(result.iterations.len(), 3);
}

#[tokio::test]
async fn constraint_repair_cap_is_enforced() {
    let dir = temp_dir();
    write_file(dir.path(), "app/main.py", MAIN_PY);
    let stuck = server_error("/widgets/{id}");
    // The persistent violation shares each run with a different one, so the
    // sets never repeat and the pass rate never moves.
    let steps = (1..=4)
        .map(|i| Step::Run(smoke_run(2, &[stuck.clone(), server_error(&format!("/other{i}"))])))
        .collect();
    let harness = Arc::new(ScriptedHarness::new(steps));
    let fallback = Arc::new(EditingFallback::new("app/main.py"));
    let config = RepairConfig {
        convergence_epsilon: 0.0,
        max_iterations: 4,
        max_repairs_per_constraint: 2,
        ..RepairConfig::default()
    };
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);

    let result = RepairOrchestrator::new(Arc::clone(&harness), config)
        .with_fallback(fallback.clone())
        .run(&mut engine, &target(dir.path()), &scenarios(&["a"]), None)
        .await
        .unwrap();

    assert_eq!(result.status, RepairStatus::IterationLimit);
    assert_eq!(result.iterations.len(), 4);
    let stuck_fixes = result
        .fixes_applied
        .iter()
        .filter(|f| f.violation_id == stuck.id() && f.success)
        .count();
    assert_eq!(stuck_fixes, 2);
    // Iteration 3 still delegates the other violation.
    assert_eq!(fallback.calls(), 3);
    assert_eq!(harness.rebuilds(), 3);

    let unresolved = result
        .unresolved
        .iter()
        .find(|u| u.violation.id() == stuck.id())
        .unwrap();
    assert!(unresolved.reason.contains("Repair cap"), "{}", unresolved.reason);
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn regression_rolls_back_the_previous_iteration() {
    let dir = temp_dir();
    write_file(dir.path(), "app/main.py", MAIN_PY);
    let v = server_error("/widgets/{id}");
    let harness = Arc::new(ScriptedHarness::new(vec![
        Step::Run(smoke_run(1, &[v.clone()])),
        Step::Run(smoke_run(0, &[v, server_error("/gadgets")])),
    ]));
    let fallback = Arc::new(EditingFallback::new("app/main.py"));
    let config = RepairConfig::default();
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);
    let (tx, mut rx) = mpsc::channel(64);

    let result = RepairOrchestrator::new(Arc::clone(&harness), config)
        .with_fallback(fallback)
        .with_events(tx)
        .run(&mut engine, &target(dir.path()), &scenarios(&["a", "b"]), None)
        .await
        .unwrap();

    assert_eq!(result.status, RepairStatus::Regressed);
    assert!(result.regression_detected);
    assert_eq!(result.final_pass_rate, 0.5);
    assert_eq!(result.total_repairs, 0);
    assert_eq!(harness.rebuilds(), 1);

    // The fallback's edit is gone and its records say so.
    assert_eq!(read_file(dir.path(), "app/main.py"), MAIN_PY);
    assert_eq!(result.fixes_applied.len(), 1);
    assert!(result.fixes_applied[0].success && result.fixes_applied[0].reverted);
    assert!(!result.mutations.is_empty());
    assert!(result.mutations.iter().all(|m| m.result == MutationResult::Reverted));
    // Fallback edits carry no fragments to learn an anti-pattern from.
    assert_eq!(store.anti_pattern_count().await, 0);

    // Unresolved reflects the restored tree, i.e. iteration 1.
    assert_eq!(result.unresolved.len(), 1);
    assert_eq!(result.unresolved[0].violation.endpoint, "/widgets/{id}");

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        RepairEvent::RolledBack { from_iteration: 2, to_iteration: 1, reverted_fixes: 1 }
    )));
    assert!(matches!(events.first(), Some(RepairEvent::RunStarted { scenario_count: 2, .. })));
    assert!(matches!(
        events.last(),
        Some(RepairEvent::RunFinished { status: RepairStatus::Regressed, .. })
    ));
}

#[tokio::test]
async fn startup_failure_after_a_repair_counts_as_regression() {
    let dir = temp_dir();
    write_file(dir.path(), "app/main.py", MAIN_PY);
    let harness = Arc::new(ScriptedHarness::new(vec![
        Step::Run(smoke_run(1, &[server_error("/widgets/{id}")])),
        Step::StartupFailure("service exited during startup (exit status: 1)".to_string()),
    ]));
    let config = RepairConfig::default();
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);

    let result = RepairOrchestrator::new(harness, config)
        .with_fallback(Arc::new(EditingFallback::new("app/main.py")))
        .run(&mut engine, &target(dir.path()), &scenarios(&["a", "b"]), None)
        .await
        .unwrap();

    assert_eq!(result.status, RepairStatus::Regressed);
    assert!(result.iterations[1].startup_failed);
    assert_eq!(result.iterations[1].pass_rate, 0.0);
    assert_eq!(read_file(dir.path(), "app/main.py"), MAIN_PY);
}

#[tokio::test]
async fn first_iteration_startup_failure_is_fatal() {
    let dir = temp_dir();
    write_file(dir.path(), "app/main.py", MAIN_PY);
    let harness = Arc::new(ScriptedHarness::new(vec![Step::StartupFailure(
        "http://127.0.0.1:8000/health not ready after 60s".to_string(),
    )]));
    let config = RepairConfig::default();
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);

    let err = RepairOrchestrator::new(Arc::clone(&harness), config)
        .run(&mut engine, &target(dir.path()), &scenarios(&["a"]), None)
        .await
        .unwrap_err();

    let DomainError::StartupFailed { reason, logs } = err else {
        panic!("expected StartupFailed, got {err:?}");
    };
    assert!(reason.contains("not ready"));
    assert!(logs.contains("ImportError"));
    assert_eq!(harness.runs(), 1);
}

#[tokio::test]
async fn rebuild_failure_is_recorded_and_the_loop_continues() {
    let dir = temp_dir();
    write_file(dir.path(), "app/main.py", MAIN_PY);
    let v = server_error("/widgets/{id}");
    let harness = Arc::new(
        ScriptedHarness::new(vec![
            Step::Run(smoke_run(1, &[v])),
            Step::Run(smoke_run(2, &[])),
        ])
        .with_failing_rebuilds(),
    );
    let config = RepairConfig::default();
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);

    let result = RepairOrchestrator::new(Arc::clone(&harness), config)
        .with_fallback(Arc::new(EditingFallback::new("app/main.py")))
        .run(&mut engine, &target(dir.path()), &scenarios(&["a", "b"]), None)
        .await
        .unwrap();

    assert!(result.iterations[0].rebuild_failed);
    assert_eq!(result.status, RepairStatus::TargetReached);
    assert_eq!(result.total_repairs, 1);
    assert_eq!(result.mutations[0].result, MutationResult::Success);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_interrupts_a_running_suite() {
    let dir = temp_dir();
    write_file(dir.path(), "app/main.py", MAIN_PY);
    let harness = Arc::new(ScriptedHarness::new(vec![Step::Hang]));
    let config = RepairConfig::default();
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);
    let (tx, rx) = broadcast::channel(1);

    let signal = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        tx
    });
    let started = Instant::now();
    let result = RepairOrchestrator::new(Arc::clone(&harness), config)
        .run(&mut engine, &target(dir.path()), &scenarios(&["a"]), Some(rx))
        .await
        .unwrap();
    let _tx = signal.await.unwrap();

    assert_eq!(result.status, RepairStatus::Cancelled);
    assert!(result.iterations.is_empty());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(harness.interrupted(), 1);
}

#[tokio::test]
async fn shutdown_before_start_runs_nothing() {
    let dir = temp_dir();
    let harness = Arc::new(ScriptedHarness::new(vec![Step::Run(smoke_run(1, &[]))]));
    let config = RepairConfig::default();
    let store = Arc::new(InMemoryPatternStore::new());
    let mut engine = engine(&config, &store);
    let (tx, rx) = broadcast::channel(1);
    tx.send(()).unwrap();

    let result = RepairOrchestrator::new(Arc::clone(&harness), config)
        .run(&mut engine, &target(dir.path()), &scenarios(&["a"]), Some(rx))
        .await
        .unwrap();

    assert_eq!(result.status, RepairStatus::Cancelled);
    assert_eq!(harness.runs(), 0);
}
