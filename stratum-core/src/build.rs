//! Wires the per-stage modules into the whole-project pipeline: project
//! tree → catalog/DAG → (per selected model, in parallel up to a worker
//! bound) render → optional lineage → orchestrator submission.
//!
//! This is the module a caller like `stratum-cli` actually drives; none of
//! the stage modules it composes know about each other directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::{self, Catalog, Dag};
use crate::config::EngineConfig;
use crate::error::{Error, Errors};
use crate::lineage::{self, Lineage, Schema as LineageSchema};
use crate::macros::{self, Registry};
use crate::model::{Model, QualifiedName};
use crate::orchestrator::{self, BuildReport, CancellationToken, DatabaseAdapter, StateStore};
use crate::render;
use crate::runtime::value::Value;
use crate::runtime::{self, EvalContext, Pool, RunParams, Target};

/// Everything scanned from a project tree before any model is rendered:
/// the catalog, its resolved DAG, and the registered macros.
pub struct Project {
    pub catalog: Catalog,
    pub dag: Dag,
    pub macros: Registry,
}

/// Scans `paths` and resolves the full reference graph. Catalog/DAG/registry construction errors are fatal to
/// the whole build and abort before any model renders.
pub fn load_project(paths: &crate::config::ProjectPaths) -> Result<Project, Errors> {
    let (catalog, mut errors) = catalog::build(&paths.models_dir, &paths.seeds_dir);
    let (macros, macro_errors) = macros::load_and_register(&paths.macros_dir);
    errors.0.extend(macro_errors.0);
    if !errors.is_empty() {
        return Err(errors);
    }

    let dag = catalog.resolve_graph()?;
    Ok(Project { catalog, dag, macros })
}

/// One model's fully compiled output: its rendered SQL, plus lineage when
/// extraction succeeded.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub qualified_name: QualifiedName,
    pub sql: String,
    pub lineage: Option<Lineage>,
}

/// Renders one model against `project` and `cfg`. Pure function of its
/// inputs beyond logging ("re-entrant and thread-safe with
/// respect to distinct models").
pub fn compile_model(
    project: &Project,
    model: &Model,
    base_globals: &BTreeMap<String, Value>,
    cfg: &EngineConfig,
    lineage_schema: Option<&LineageSchema>,
) -> Result<CompiledModel, Error> {
    let globals = runtime::for_model(base_globals, &model.frontmatter, &model.qualified_name);
    let resolved_refs = project.catalog.resolved_refs_for(model);
    let ctx = EvalContext {
        globals: &globals,
        resolved_refs: &resolved_refs,
        target_schema: &cfg.target_schema,
    };

    log::debug!("rendering {}", model.qualified_name);
    let sql = render::render(&model.body, &ctx, Some(&model.source_path))?;

    let empty_schema = LineageSchema::default();
    let schema = lineage_schema.unwrap_or(&empty_schema);
    let lineage = lineage::extract(&sql, schema).ok();

    Ok(CompiledModel { qualified_name: model.qualified_name.clone(), sql, lineage })
}

/// Renders every model named by `order` against `project`, up to
/// `cfg.worker_count` at a time ("Parallel per-model
/// evaluation"). Rendering one model never blocks on another; the bounded
/// evaluator pool is shared, never the AST cache or globals map (both are
/// immutable and read-shared). Per-model render errors are captured and
/// returned keyed by model rather than aborting the batch: errors inside one
/// model's pipeline are captured without interrupting siblings.
pub fn compile_selected(
    project: &Project,
    order: &[QualifiedName],
    cfg: &EngineConfig,
    lineage_schema: Option<&LineageSchema>,
) -> (BTreeMap<QualifiedName, CompiledModel>, BTreeMap<QualifiedName, Error>) {
    let params = RunParams {
        env: cfg.env.clone(),
        target: Target {
            type_: cfg.target_type.clone(),
            schema: cfg.target_schema.clone(),
            database: cfg.target_database.clone(),
        },
    };
    let macro_modules: Vec<_> = project.macros.modules().cloned().collect();
    let base_globals = runtime::base_globals(&params, &macro_modules);
    let pool = Pool::new(cfg.evaluator_pool_size);

    let compiled: Arc<std::sync::Mutex<BTreeMap<QualifiedName, CompiledModel>>> =
        Arc::new(std::sync::Mutex::new(BTreeMap::new()));
    let failed: Arc<std::sync::Mutex<BTreeMap<QualifiedName, Error>>> =
        Arc::new(std::sync::Mutex::new(BTreeMap::new()));

    let worker_count = cfg.worker_count.max(1).min(order.len().max(1));
    let chunks = split_round_robin(order, worker_count);

    std::thread::scope(|scope| {
        for chunk in &chunks {
            let compiled = Arc::clone(&compiled);
            let failed = Arc::clone(&failed);
            let pool = &pool;
            let base_globals = &base_globals;
            scope.spawn(move || {
                for name in chunk.iter().copied() {
                    let _slot = pool.acquire();
                    let Some(model) = project.catalog.get(name) else { continue };
                    match compile_model(project, model, base_globals, cfg, lineage_schema) {
                        Ok(out) => {
                            compiled.lock().expect("compile results mutex poisoned").insert(name.clone(), out);
                        }
                        Err(e) => {
                            failed.lock().expect("compile results mutex poisoned").insert(name.clone(), e);
                        }
                    }
                }
            });
        }
    });

    (
        Arc::try_unwrap(compiled)
            .expect("all worker threads joined by end of scope")
            .into_inner()
            .expect("compile results mutex poisoned"),
        Arc::try_unwrap(failed)
            .expect("all worker threads joined by end of scope")
            .into_inner()
            .expect("compile results mutex poisoned"),
    )
}

fn split_round_robin<'a, T>(items: &'a [T], buckets: usize) -> Vec<Vec<&'a T>> {
    let mut out: Vec<Vec<&T>> = (0..buckets).map(|_| Vec::new()).collect();
    for (i, item) in items.iter().enumerate() {
        out[i % buckets].push(item);
    }
    out
}

/// Compiles and submits `order` end-to-end: render every selected model
/// (dependents of a render failure are still attempted — rendering has no
/// cross-model data dependency — but any model whose render failed is
/// never handed to the orchestrator, and any model depending on it is
/// reported `Skipped` exactly as if its submission had failed, per spec
/// §7's "dependents skipped" recovery rule).
#[allow(clippy::too_many_arguments)]
pub fn run_build(
    project: &Project,
    order: &[QualifiedName],
    cfg: &EngineConfig,
    adapter: &dyn DatabaseAdapter,
    state: &dyn StateStore,
    cancel: &CancellationToken,
    lineage_schema: Option<&LineageSchema>,
) -> (BuildReport, BTreeMap<QualifiedName, Lineage>, Errors) {
    let (compiled, render_failures) = compile_selected(project, order, cfg, lineage_schema);

    let mut errors = Errors::default();
    for (name, e) in &render_failures {
        log::warn!("{name} failed to render: {e}");
        errors.push(e.clone());
    }

    let jobs: BTreeMap<QualifiedName, String> =
        compiled.iter().map(|(name, c)| (name.clone(), c.sql.clone())).collect();

    let report = orchestrator::run_with_failures(
        &project.dag,
        &jobs,
        &render_failures,
        adapter,
        state,
        cfg.worker_count,
        cfg.model_timeout,
        cancel,
    );

    let lineages: BTreeMap<QualifiedName, Lineage> = compiled
        .into_iter()
        .filter_map(|(name, c)| c.lineage.map(|l| (name, l)))
        .collect();

    (report, lineages, errors)
}

/// Resolves `selectors` against `project` and returns the matching models
/// in topological order.
pub fn select(
    project: &Project,
    selectors: &[&str],
    upstream: bool,
    downstream: bool,
) -> Result<Vec<QualifiedName>, catalog::SelectorError> {
    catalog::select(&project.catalog, &project.dag, selectors, upstream, downstream)
}

/// All models in topological order — the default selection when no
/// selector is given.
pub fn all_models(project: &Project) -> Vec<QualifiedName> {
    project.dag.order().0.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{InMemoryStateStore, NoopDatabaseAdapter};
    use crate::test_support::ScratchDir;
    use std::fs;
    use std::path::Path;

    fn paths(root: &Path) -> crate::config::ProjectPaths {
        crate::config::ProjectPaths::under(root)
    }

    #[test]
    fn loads_renders_and_submits_a_small_project() {
        let dir = ScratchDir::new("stratum_build");
        fs::create_dir_all(dir.path().join("models/staging")).unwrap();
        dir.write_file(
            "models/staging/stg_orders.sql",
            "/*---\nschema: staging\n---*/\nSELECT 1 AS id",
        );
        dir.write_file(
            "models/mart_orders.sql",
            "/*---\nschema: analytics\n---*/\nSELECT * FROM {{ ref(\"stg_orders\") }}",
        );

        let project = load_project(&paths(dir.path())).expect("project loads");
        let order = all_models(&project);
        assert_eq!(order.len(), 2);

        let cfg = EngineConfig::default();
        let (report, _lineages, errors) = run_build(
            &project,
            &order,
            &cfg,
            &NoopDatabaseAdapter,
            &InMemoryStateStore::new(),
            &CancellationToken::new(),
            None,
        );
        assert!(errors.is_empty());
        assert_eq!(report.exit_code, 0);
    }

    #[test]
    fn ref_resolves_to_target_schema_qualified_name() {
        let dir = ScratchDir::new("stratum_build_ref");
        fs::create_dir_all(dir.path().join("models")).unwrap();
        dir.write_file(
            "models/stg_orders.sql",
            "/*---\nschema: staging\n---*/\nSELECT 1",
        );
        dir.write_file(
            "models/mart_orders.sql",
            "/*---\nschema: analytics\n---*/\nSELECT * FROM {{ ref(\"stg_orders\") }}",
        );

        let project = load_project(&paths(dir.path())).expect("project loads");
        let mut cfg = EngineConfig::default();
        cfg.target_schema = "prod".to_string();
        let (compiled, failures) = compile_selected(&project, &all_models(&project), &cfg, None);
        assert!(failures.is_empty());
        let mart = compiled.get(&QualifiedName::new("analytics", "mart_orders")).unwrap();
        assert_eq!(mart.sql, "SELECT * FROM prod.stg_orders");
    }

    #[test]
    fn render_failure_skips_dependents_without_aborting_siblings() {
        let dir = ScratchDir::new("stratum_build_fail");
        fs::create_dir_all(dir.path().join("models")).unwrap();
        dir.write_file("models/a.sql", "/*---\nschema: s\n---*/\nSELECT {{ }}");
        dir.write_file(
            "models/b.sql",
            "/*---\nschema: s\n---*/\nSELECT * FROM {{ ref(\"a\") }}",
        );
        dir.write_file("models/c.sql", "/*---\nschema: s\n---*/\nSELECT 1");

        let project = load_project(&paths(dir.path())).expect("project loads");
        let cfg = EngineConfig::default();
        let (report, _lineages, errors) = run_build(
            &project,
            &all_models(&project),
            &cfg,
            &NoopDatabaseAdapter,
            &InMemoryStateStore::new(),
            &CancellationToken::new(),
            None,
        );
        assert!(!errors.is_empty());
        assert!(matches!(
            report.outcomes.get(&QualifiedName::new("s", "c")),
            Some(crate::orchestrator::Outcome::Success)
        ));
        assert!(matches!(
            report.outcomes.get(&QualifiedName::new("s", "a")),
            Some(crate::orchestrator::Outcome::Failed(_))
        ));
        assert!(matches!(
            report.outcomes.get(&QualifiedName::new("s", "b")),
            Some(crate::orchestrator::Outcome::Skipped)
        ));
        assert_eq!(report.exit_code, 1);
    }
}
