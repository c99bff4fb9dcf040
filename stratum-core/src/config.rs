//! The typed configuration surface the core exposes to its caller. Loading
//! these from a YAML/TOML file on disk is out of scope; the core
//! only defines the shape the CLI (or any other embedder) fills in from
//! flags, environment variables, or a config file of its own choosing.

use std::path::PathBuf;

use crate::runtime::DEFAULT_POOL_SIZE;

/// Where a project's three input trees live on disk ("File
/// layout"). `macros_dir` may not exist — an absent macro directory behaves
/// like an empty one.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub models_dir: PathBuf,
    pub seeds_dir: PathBuf,
    pub macros_dir: PathBuf,
}

impl ProjectPaths {
    /// The conventional `models/`, `seeds/`, `macros/` layout directly under
    /// a project root.
    pub fn under(project_root: impl Into<PathBuf>) -> Self {
        let root = project_root.into();
        ProjectPaths {
            models_dir: root.join("models"),
            seeds_dir: root.join("seeds"),
            macros_dir: root.join("macros"),
        }
    }
}

/// Run-wide knobs that parameterize one build: which
/// environment/target a render sees, and the two concurrency bounds
/// (orchestrator workers, evaluator-thread pool).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub env: String,
    pub target_type: String,
    pub target_schema: String,
    pub target_database: String,
    /// Default schema for models whose path has no schema segment and whose
    /// frontmatter doesn't set one.
    pub default_schema: String,
    /// Orchestrator worker pool size.
    pub worker_count: usize,
    /// Evaluator-thread pool size.
    pub evaluator_pool_size: usize,
    /// Per-model execution timeout; `None` disables the timeout.
    pub model_timeout: Option<std::time::Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            env: "dev".to_string(),
            target_type: "duckdb".to_string(),
            target_schema: "analytics".to_string(),
            target_database: "main".to_string(),
            default_schema: "default".to_string(),
            worker_count: DEFAULT_WORKER_COUNT,
            evaluator_pool_size: DEFAULT_POOL_SIZE,
            model_timeout: None,
        }
    }
}

/// Default orchestrator worker pool size.
pub const DEFAULT_WORKER_COUNT: usize = 8;
