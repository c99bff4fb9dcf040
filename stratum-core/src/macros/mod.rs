//! Macro loader and registry: discovers `*.star` helper files,
//! executes each in an isolated frame, and exposes their public bindings
//! under a filename-derived namespace.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Errors, Reason};
use crate::runtime::eval::exec_module;
use crate::runtime::macro_lang::parse_module;
use crate::runtime::value::Namespace;

static NAMESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

const RESERVED_NAMESPACES: &[&str] = &["config", "env", "target", "this"];

/// One loaded `.star` file: its namespace, source path and frozen exports.
#[derive(Debug, Clone)]
pub struct MacroModule {
    pub namespace: Namespace,
    pub source_path: PathBuf,
}

/// The set of registered macro namespaces for one run. Immutable once built
/// — read-shared without locks across the orchestrator's worker pool.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    modules: BTreeMap<String, MacroModule>,
}

impl Registry {
    pub fn get(&self, namespace: &str) -> Option<&MacroModule> {
        self.modules.get(namespace)
    }

    pub fn modules(&self) -> impl Iterator<Item = &MacroModule> {
        self.modules.values()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }
}

/// Loads every `*.star` file directly under `macros_dir` (non-recursive),
/// in lexicographic order, and returns a frozen registry plus any fatal
/// errors (duplicate namespaces, reserved names, parse/eval failures).
///
/// A missing `macros_dir` is not an error: it behaves like an empty
/// directory ("Empty `macros/` directory returns a registry of
/// size 0").
pub fn load_and_register(macros_dir: &Path) -> (Registry, Errors) {
    let mut registry = Registry::default();
    let mut errors = Errors::default();

    let mut paths: Vec<PathBuf> = match fs::read_dir(macros_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().map(|e| e == "star").unwrap_or(false))
            .collect(),
        Err(_) => Vec::new(),
    };
    paths.sort();

    for path in paths {
        match load_one(&path) {
            Ok(module) => {
                let namespace = module.namespace.name.clone();
                if let Some(existing) = registry.modules.get(&namespace) {
                    errors.push(Error::new(Reason::RegistryError {
                        namespace,
                        first: existing.source_path.clone(),
                    }));
                    continue;
                }
                registry.modules.insert(namespace, module);
            }
            Err(e) => errors.push(e.at(path.clone(), crate::error::Position { line: 1, column: 1 })),
        }
    }

    (registry, errors)
}

fn load_one(path: &Path) -> Result<MacroModule, Error> {
    let namespace = crate::error::file_stem_or(path, "macro");
    if !NAMESPACE_RE.is_match(&namespace) {
        return Err(Error::new(Reason::RegistryError {
            namespace: namespace.clone(),
            first: path.to_path_buf(),
        })
        .with_help("macro namespaces must match `[A-Za-z_][A-Za-z0-9_]*`"));
    }
    if RESERVED_NAMESPACES.contains(&namespace.as_str()) {
        return Err(Error::new(Reason::RegistryError {
            namespace: namespace.clone(),
            first: path.to_path_buf(),
        })
        .with_help("this namespace is reserved for an engine-provided global"));
    }

    let source = fs::read_to_string(path).map_err(|e| {
        Error::new(Reason::RegistryError {
            namespace: namespace.clone(),
            first: path.to_path_buf(),
        })
        .with_help(e.to_string())
    })?;

    let stmts = parse_module(&source)?;
    let bindings = exec_module(&stmts)?;

    let exports = bindings
        .into_iter()
        .filter(|(name, _)| !name.starts_with('_'))
        .collect();

    Ok(MacroModule {
        namespace: Namespace { name: namespace, exports },
        source_path: path.to_path_buf(),
    })
}
