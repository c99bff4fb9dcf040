//! Core of a SQL transformation engine: compiles a project tree of
//! annotated SQL "models" into a dependency-ordered, executable build.
//!
//! You probably want to start with [`build::load_project`] and
//! [`build::run_build`]. For more granular access, the pipeline a project
//! goes through is:
//!
//! ```ascii
//!  models/ + seeds/        header::scan + refs::harvest
//!    (file tree)    ───────────────────────────────────►  catalog::build
//!                                                               │
//!                                                   catalog::Catalog::resolve_graph
//!                                                               ▼
//!                                                            catalog::Dag
//!                                                               │
//!                                 macros::load_and_register      │
//!                                          │                     │
//!                                          ▼                     ▼
//!                                  runtime::base_globals ──► build::compile_selected
//!                                                               │
//!                                            template::parse + render::render
//!                                                               ▼
//!                                                          rendered SQL
//!                                                          ╱          ╲
//!                                            lineage::extract      orchestrator::run
//! ```
//!
//! This crate implements the pipeline only: the CLI entry point, config
//! file loading, the state store's persistence, the database adapter's
//! wire protocol, and package-manager fetch of remote macro bundles are all
//! out of scope and specified here only at their trait/struct boundary
//! (see [`orchestrator::StateStore`], [`orchestrator::DatabaseAdapter`],
//! [`config`]).

pub mod build;
pub mod catalog;
pub mod config;
pub mod error;
pub mod header;
pub mod lineage;
pub mod macros;
pub mod model;
pub mod orchestrator;
pub mod refs;
pub mod render;
pub mod runtime;
pub mod seeds;
pub mod template;

#[cfg(test)]
mod test_support;

pub use build::{compile_model, compile_selected, load_project, run_build, CompiledModel, Project};
pub use config::{EngineConfig, ProjectPaths};
pub use error::{Error, Errors, Reason};
pub use model::{Frontmatter, Materialization, Model, QualifiedName, Seed};
