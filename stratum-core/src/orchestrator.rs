//! The build orchestrator: schedules selected models over
//! a bounded worker pool in dependency order, submits their rendered SQL
//! through a [`DatabaseAdapter`], and records per-model [`Outcome`]s.
//!
//! `StateStore` and `DatabaseAdapter` are specified only at their interface
//!; this module defines the trait boundary plus an in-memory store
//! and a no-op adapter so the scheduler can be exercised without a real
//! database.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::catalog::Dag;
use crate::error::{Error, Reason};
use crate::model::QualifiedName;

/// Per-model last-run metadata and incremental watermarks. Opaque to the core beyond this shape.
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub last_success_at: Option<String>,
    pub watermark: Option<String>,
}

/// Key-value persistence for run metadata. Reads may occur concurrently;
/// writes are serialized through a single writer ("Shared
/// resources"). A real implementation is out of scope; the core
/// ships only [`InMemoryStateStore`].
pub trait StateStore: Send + Sync {
    fn get_run_metadata(&self, model: &QualifiedName) -> Option<RunMeta>;
    fn put_run_metadata(&self, model: &QualifiedName, meta: RunMeta);
    fn clear_run_metadata(&self, model: &QualifiedName);
}

/// An in-memory `StateStore`, suitable for tests and the CLI's `--dry-run`
/// mode. Writes are serialized behind a single mutex, matching the
/// single-writer-queue requirement without needing a real backing store.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: Mutex<BTreeMap<QualifiedName, RunMeta>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        InMemoryStateStore::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn get_run_metadata(&self, model: &QualifiedName) -> Option<RunMeta> {
        self.entries.lock().expect("state store mutex poisoned").get(model).cloned()
    }

    fn put_run_metadata(&self, model: &QualifiedName, meta: RunMeta) {
        self.entries.lock().expect("state store mutex poisoned").insert(model.clone(), meta);
    }

    fn clear_run_metadata(&self, model: &QualifiedName) {
        self.entries.lock().expect("state store mutex poisoned").remove(model);
    }
}

/// The database this build submits rendered SQL to. Opaque to the core;
/// assumed to tolerate concurrent submissions from distinct workers (spec
/// §5). A real adapter is out of scope; the core ships only
/// [`NoopDatabaseAdapter`].
pub trait DatabaseAdapter: Send + Sync {
    fn execute(&self, model: &QualifiedName, sql: &str) -> Result<(), Error>;
}

/// Accepts every submission without doing anything, for tests and
/// `--dry-run`.
#[derive(Debug, Default)]
pub struct NoopDatabaseAdapter;

impl DatabaseAdapter for NoopDatabaseAdapter {
    fn execute(&self, _model: &QualifiedName, _sql: &str) -> Result<(), Error> {
        Ok(())
    }
}

/// The terminal state of one model's build.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Failed(Error),
    /// Skipped because a dependency failed, timed out, or was cancelled.
    Skipped,
    Timeout,
    Cancelled,
}

/// The whole build's result: one outcome per selected model, plus the
/// process exit code the §6 table assigns to the run as a whole.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub outcomes: BTreeMap<QualifiedName, Outcome>,
    pub exit_code: i32,
}

impl BuildReport {
    fn from_outcomes(outcomes: BTreeMap<QualifiedName, Outcome>, cancelled: bool) -> Self {
        let exit_code = if cancelled {
            130
        } else if outcomes.values().any(|o| matches!(o, Outcome::Failed(_) | Outcome::Timeout)) {
            1
        } else {
            0
        };
        BuildReport { outcomes, exit_code }
    }
}

/// A single cooperative cancellation flag, checked between model starts
/// ("Cancellation"): in-flight submissions finish, no new ones start.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One already-rendered unit of work the orchestrator submits.
pub struct Job<'a> {
    pub model: QualifiedName,
    pub sql: &'a str,
}

/// Runs `jobs` to completion over `dag`'s dependency order, honoring
/// `worker_count` concurrent submissions, `timeout` per model, and
/// `cancel` ("Cancellation"). A model is skipped — never submitted —
/// if any of its dependencies did not succeed, matching the "dependents are
/// skipped" recovery rule for every fatal-to-that-model error kind in §7.
pub fn run(
    dag: &Dag,
    jobs: &BTreeMap<QualifiedName, String>,
    adapter: &dyn DatabaseAdapter,
    state: &dyn StateStore,
    worker_count: usize,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> BuildReport {
    run_with_failures(dag, jobs, &BTreeMap::new(), adapter, state, worker_count, timeout, cancel)
}

/// Like [`run`], but also takes models that are already known to have
/// failed before submission (e.g. a render error from an earlier pipeline
/// stage). They're folded into the same selected set and dependency
/// accounting as the jobs that did render, so their dependents are
/// correctly reported `Skipped` rather than silently omitted — the caller
/// doesn't have to requeue the whole DAG to get that propagation right.
#[allow(clippy::too_many_arguments)]
pub fn run_with_failures(
    dag: &Dag,
    jobs: &BTreeMap<QualifiedName, String>,
    failed: &BTreeMap<QualifiedName, Error>,
    adapter: &dyn DatabaseAdapter,
    state: &dyn StateStore,
    worker_count: usize,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> BuildReport {
    let worker_count = worker_count.max(1);
    let selected: BTreeSet<QualifiedName> =
        jobs.keys().chain(failed.keys()).cloned().collect();
    let order: Vec<QualifiedName> = dag.order().0.iter().filter(|n| selected.contains(n)).cloned().collect();

    let outcomes: Mutex<BTreeMap<QualifiedName, Outcome>> = Mutex::new(
        failed.iter().map(|(n, e)| (n.clone(), Outcome::Failed(e.clone()))).collect(),
    );
    let remaining_deps: Mutex<BTreeMap<QualifiedName, usize>> = Mutex::new(
        order
            .iter()
            .map(|n| (n.clone(), dag.dependencies(n).iter().filter(|d| selected.contains(d)).count()))
            .collect(),
    );
    let (ready_tx, ready_rx) = mpsc::channel::<QualifiedName>();
    let ready_rx = Mutex::new(ready_rx);

    // Seed the ready queue with every runnable, not-already-failed model,
    // then propagate the pre-failed ones through their dependents exactly
    // as a completed worker iteration would.
    {
        let mut deps = remaining_deps.lock().expect("orchestrator mutex poisoned");
        for node in &order {
            if deps[node] == 0 && !failed.contains_key(node) {
                ready_tx.send(node.clone()).expect("ready channel receiver dropped before send");
            }
        }
        for node in failed.keys() {
            for dependent in dag.dependents(node) {
                if !order.contains(dependent) {
                    continue;
                }
                if let Some(count) = deps.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 && !failed.contains_key(dependent) {
                        let _ = ready_tx.send(dependent.clone());
                    }
                }
            }
        }
    }
    let finished_count = Mutex::new(failed.len());
    let total = order.len();

    thread::scope(|scope| {
        for _ in 0..worker_count.min(total.max(1)) {
            let outcomes = &outcomes;
            let remaining_deps = &remaining_deps;
            let ready_rx = &ready_rx;
            let ready_tx = ready_tx.clone();
            let finished_count = &finished_count;
            let order = &order;

            scope.spawn(move || loop {
                if *finished_count.lock().expect("orchestrator mutex poisoned") >= total {
                    return;
                }
                let next = {
                    let rx = ready_rx.lock().expect("orchestrator mutex poisoned");
                    rx.recv_timeout(Duration::from_millis(20))
                };
                let model = match next {
                    Ok(m) => m,
                    Err(_) => continue,
                };

                let outcome = if cancel.is_cancelled() {
                    Outcome::Cancelled
                } else if dag
                    .dependencies(&model)
                    .iter()
                    .any(|d| matches!(outcomes.lock().expect("orchestrator mutex poisoned").get(d), Some(o) if !matches!(o, Outcome::Success)))
                {
                    Outcome::Skipped
                } else {
                    run_one(&model, jobs.get(&model).expect("ready queue only holds selected models"), adapter, state, timeout)
                };

                outcomes.lock().expect("orchestrator mutex poisoned").insert(model.clone(), outcome);
                *finished_count.lock().expect("orchestrator mutex poisoned") += 1;

                for dependent in dag.dependents(&model) {
                    if !order.contains(dependent) {
                        continue;
                    }
                    let mut deps = remaining_deps.lock().expect("orchestrator mutex poisoned");
                    if let Some(count) = deps.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            let _ = ready_tx.send(dependent.clone());
                        }
                    }
                }
            });
        }
    });

    let outcomes = outcomes.into_inner().expect("orchestrator mutex poisoned");
    BuildReport::from_outcomes(outcomes, cancel.is_cancelled())
}

fn run_one(
    model: &QualifiedName,
    sql: &str,
    adapter: &dyn DatabaseAdapter,
    state: &dyn StateStore,
    timeout: Option<Duration>,
) -> Outcome {
    log::debug!("submitting {model}");
    let result = match timeout {
        None => adapter.execute(model, sql),
        Some(budget) => {
            let (tx, rx) = mpsc::channel();
            thread::scope(|scope| {
                scope.spawn(|| {
                    let _ = tx.send(adapter.execute(model, sql));
                });
                match rx.recv_timeout(budget) {
                    Ok(result) => result,
                    Err(_) => Err(Error::new(Reason::Timeout)),
                }
            })
        }
    };

    match result {
        Ok(()) => {
            state.put_run_metadata(model, RunMeta::default());
            Outcome::Success
        }
        Err(e) if matches!(e.reason, Reason::Timeout) => {
            log::warn!("{model} timed out");
            Outcome::Timeout
        }
        Err(e) => {
            log::warn!("{model} failed: {e}");
            Outcome::Failed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qn(s: &str) -> QualifiedName {
        let (schema, name) = s.split_once('.').unwrap();
        QualifiedName::new(schema, name)
    }

    fn jobs(names: &[&str]) -> BTreeMap<QualifiedName, String> {
        names.iter().map(|n| (qn(n), "select 1".to_string())).collect()
    }

    #[test]
    fn all_succeed_yields_exit_code_zero() {
        let mut edges = BTreeMap::new();
        edges.insert(qn("s.a"), vec![qn("s.b")]);
        edges.insert(qn("s.b"), vec![]);
        let dag = Dag::build(edges).unwrap();

        let report = run(&dag, &jobs(&["s.a", "s.b"]), &NoopDatabaseAdapter, &InMemoryStateStore::new(), 4, None, &CancellationToken::new());
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes.values().all(|o| matches!(o, Outcome::Success)));
    }

    struct FailingAdapter {
        fails: QualifiedName,
    }

    impl DatabaseAdapter for FailingAdapter {
        fn execute(&self, model: &QualifiedName, _sql: &str) -> Result<(), Error> {
            if *model == self.fails {
                Err(Error::new(Reason::DatabaseError { message: "boom".to_string() }))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn dependent_of_a_failed_model_is_skipped() {
        let mut edges = BTreeMap::new();
        edges.insert(qn("s.a"), vec![qn("s.b")]);
        edges.insert(qn("s.b"), vec![]);
        let dag = Dag::build(edges).unwrap();

        let adapter = FailingAdapter { fails: qn("s.b") };
        let report = run(&dag, &jobs(&["s.a", "s.b"]), &adapter, &InMemoryStateStore::new(), 4, None, &CancellationToken::new());
        assert_eq!(report.exit_code, 1);
        assert!(matches!(report.outcomes[&qn("s.b")], Outcome::Failed(_)));
        assert!(matches!(report.outcomes[&qn("s.a")], Outcome::Skipped));
    }

    struct SlowAdapter;

    impl DatabaseAdapter for SlowAdapter {
        fn execute(&self, _model: &QualifiedName, _sql: &str) -> Result<(), Error> {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        }
    }

    #[test]
    fn per_model_timeout_is_recorded_and_skips_dependents() {
        let mut edges = BTreeMap::new();
        edges.insert(qn("s.a"), vec![qn("s.b")]);
        edges.insert(qn("s.b"), vec![]);
        let dag = Dag::build(edges).unwrap();

        let report = run(
            &dag,
            &jobs(&["s.a", "s.b"]),
            &SlowAdapter,
            &InMemoryStateStore::new(),
            4,
            Some(Duration::from_millis(10)),
            &CancellationToken::new(),
        );
        assert_eq!(report.exit_code, 1);
        assert!(matches!(report.outcomes[&qn("s.b")], Outcome::Timeout));
        assert!(matches!(report.outcomes[&qn("s.a")], Outcome::Skipped));
    }

    #[test]
    fn pre_cancelled_token_yields_all_cancelled_and_exit_code_130() {
        let mut edges = BTreeMap::new();
        edges.insert(qn("s.a"), vec![]);
        let dag = Dag::build(edges).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = run(&dag, &jobs(&["s.a"]), &NoopDatabaseAdapter, &InMemoryStateStore::new(), 2, None, &cancel);
        assert_eq!(report.exit_code, 130);
        assert!(matches!(report.outcomes[&qn("s.a")], Outcome::Cancelled));
    }

    #[test]
    fn state_store_records_success_metadata() {
        let mut edges = BTreeMap::new();
        edges.insert(qn("s.a"), vec![]);
        let dag = Dag::build(edges).unwrap();
        let state = InMemoryStateStore::new();

        let _ = run(&dag, &jobs(&["s.a"]), &NoopDatabaseAdapter, &state, 1, None, &CancellationToken::new());
        assert!(state.get_run_metadata(&qn("s.a")).is_some());
    }
}
