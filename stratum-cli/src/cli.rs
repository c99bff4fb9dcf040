use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use stratum_core::build;
use stratum_core::orchestrator::{CancellationToken, InMemoryStateStore, NoopDatabaseAdapter};
use stratum_core::{EngineConfig, Project, ProjectPaths};

/// Entrypoint called by [crate::main]. Out of scope for the core;
/// this binary only wires the pipeline together with in-memory stand-ins
/// for the state store and database adapter .
pub fn main() -> Result<()> {
    env_logger::builder().format_timestamp(None).init();
    let cli = Cli::parse();
    let code = cli.command.run()?;
    exit(code);
}

#[derive(Parser, Debug)]
#[command(name = "stratum", about, version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug, Clone)]
struct ProjectArgs {
    /// Project root; expects `models/`, `seeds/`, and `macros/` under it.
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Selector (exact name, bare name, `tag:<t>`, `+name`, `name+`). May be
    /// repeated; omit to select every model.
    #[arg(long = "select", short = 's')]
    selectors: Vec<String>,

    /// Also include every upstream ancestor of each selected model.
    #[arg(long)]
    upstream: bool,

    /// Also include every downstream descendant of each selected model.
    #[arg(long)]
    downstream: bool,

    #[arg(long, default_value = "dev")]
    env: String,

    #[arg(long = "target-type", default_value = "duckdb")]
    target_type: String,

    #[arg(long = "target-schema", default_value = "analytics")]
    target_schema: String,

    #[arg(long = "target-database", default_value = "main")]
    target_database: String,

    #[arg(long, default_value_t = stratum_core::config::DEFAULT_WORKER_COUNT)]
    workers: usize,

    /// Per-model execution timeout, in seconds. Unset means no timeout.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl ProjectArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            env: self.env.clone(),
            target_type: self.target_type.clone(),
            target_schema: self.target_schema.clone(),
            target_database: self.target_database.clone(),
            worker_count: self.workers,
            model_timeout: self.timeout_secs.map(Duration::from_secs),
            ..EngineConfig::default()
        }
    }

    fn load(&self) -> Result<Project> {
        let paths = ProjectPaths::under(&self.project_dir);
        build::load_project(&paths).map_err(|errors| anyhow::anyhow!("{errors}"))
    }

    fn selection(&self, project: &Project) -> Result<Vec<stratum_core::QualifiedName>> {
        if self.selectors.is_empty() {
            return Ok(build::all_models(project));
        }
        let refs: Vec<&str> = self.selectors.iter().map(String::as_str).collect();
        build::select(project, &refs, self.upstream, self.downstream)
            .map_err(|e| anyhow::anyhow!("{e}"))
    }
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Render the selected models to SQL and print them, without submitting
    /// anything to a database.
    Compile {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// List the selected models, in dependency order.
    Ls {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Compile, submit (via an in-memory no-op adapter) and report per-model
    /// outcomes for the selected models.
    Run {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Compile the selected models and print the column lineage extracted
    /// from each one's rendered SQL.
    Lineage {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

impl Command {
    fn run(&self) -> Result<i32> {
        match self {
            Command::Ls { project } => {
                let p = project.load()?;
                for name in project.selection(&p)? {
                    println!("{name}");
                }
                Ok(0)
            }
            Command::Compile { project } => {
                let p = project.load()?;
                let selected = project.selection(&p)?;
                let cfg = project.engine_config();
                let (compiled, failed) = build::compile_selected(&p, &selected, &cfg, None);
                for name in &selected {
                    if let Some(model) = compiled.get(name) {
                        println!("-- {name}\n{}\n", model.sql);
                    } else if let Some(err) = failed.get(name) {
                        eprintln!("{name}: {err}");
                    }
                }
                Ok(if failed.is_empty() { 0 } else { 1 })
            }
            Command::Lineage { project } => {
                let p = project.load()?;
                let selected = project.selection(&p)?;
                let cfg = project.engine_config();
                let (compiled, failed) = build::compile_selected(&p, &selected, &cfg, None);
                for name in &selected {
                    match compiled.get(name) {
                        Some(model) => {
                            println!("{name}:");
                            match &model.lineage {
                                Some(lineage) => print_lineage(lineage),
                                None => println!("  (lineage extraction failed)"),
                            }
                        }
                        None => {
                            if let Some(err) = failed.get(name) {
                                eprintln!("{name}: {err}");
                            }
                        }
                    }
                }
                Ok(if failed.is_empty() { 0 } else { 1 })
            }
            Command::Run { project } => {
                let p = project.load()?;
                let selected = project.selection(&p)?;
                let cfg = project.engine_config();
                let (report, _lineages, errors) = build::run_build(
                    &p,
                    &selected,
                    &cfg,
                    &NoopDatabaseAdapter,
                    &InMemoryStateStore::new(),
                    &CancellationToken::new(),
                    None,
                );
                for (name, outcome) in &report.outcomes {
                    println!("{name}: {outcome:?}");
                }
                for error in &errors.0 {
                    eprintln!("{error}");
                }
                Ok(report.exit_code)
            }
        }
    }
}

fn print_lineage(lineage: &stratum_core::lineage::Lineage) {
    println!("  sources: {}", lineage.sources.iter().cloned().collect::<Vec<_>>().join(", "));
    for column in &lineage.columns {
        let sources: Vec<String> =
            column.sources.iter().map(|s| format!("{}.{}", s.table, s.column)).collect();
        match &column.function {
            Some(f) => println!("  {} <- {:?} via {f}({})", column.name, column.transform, sources.join(", ")),
            None => println!("  {} <- {:?}({})", column.name, column.transform, sources.join(", ")),
        }
    }
}
