//! Model catalog & DAG: indexes models by qualified name, builds
//! the `ref`-edge graph, and answers selector queries against it.

mod dag;
mod selector;

pub use dag::{Dag, TopoOrder};
pub use selector::{parse as parse_selector, select, ParsedSelector, Selector, SelectorError};

use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Error, Errors, Reason};
use crate::header;
use crate::model::{Materialization, Model, QualifiedName, Seed};
use crate::refs;
use crate::seeds;

/// The immutable, read-shared index of every model and seed in a project.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    models: BTreeMap<QualifiedName, Model>,
    seeds: BTreeMap<QualifiedName, Seed>,
}

impl Catalog {
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    pub fn get(&self, name: &QualifiedName) -> Option<&Model> {
        self.models.get(name)
    }

    pub fn seed(&self, name: &QualifiedName) -> Option<&Seed> {
        self.seeds.get(name)
    }

    /// Is `name` a known model or seed? `ref()` may point at either.
    pub fn contains(&self, name: &QualifiedName) -> bool {
        self.models.contains_key(name) || self.seeds.contains_key(name)
    }

    /// Resolve a bare (schema-less) model name, erroring if it is ambiguous.
    pub fn resolve_bare(&self, name: &str) -> Result<&QualifiedName, SelectorError> {
        let matches: Vec<&QualifiedName> =
            self.models.keys().filter(|qn| qn.name == name).collect();
        match matches.as_slice() {
            [] => Err(SelectorError::NotFound(name.to_string())),
            [single] => Ok(single),
            many => Err(SelectorError::Ambiguous(
                name.to_string(),
                many.iter().map(|qn| qn.to_string()).collect(),
            )),
        }
    }

    pub fn models_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a QualifiedName> {
        self.models
            .iter()
            .filter(move |(_, m)| m.frontmatter.tags.iter().any(|t| t == tag))
            .map(|(qn, _)| qn)
    }

    /// Build the reference graph: for every model, resolve each harvested
    /// name against this catalog. Unresolved references are a fatal error
    /// ("Reference edge"); cycles abort the whole build.
    pub fn resolve_graph(&self) -> Result<Dag, Errors> {
        let mut errors = Errors::default();
        let mut edges: BTreeMap<QualifiedName, Vec<QualifiedName>> = BTreeMap::new();

        for model in self.models.values() {
            let mut deps = Vec::new();
            for raw_ref in &model.references {
                match resolve_ref(self, raw_ref) {
                    Ok(target) => deps.push(target),
                    Err(()) => errors.push(Error::new(Reason::UnresolvedRef {
                        from: model.qualified_name.to_string(),
                        reference: raw_ref.clone(),
                    })),
                }
            }
            edges.insert(model.qualified_name.clone(), deps);
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Dag::build(edges).map_err(Errors::from)
    }

    /// Maps each raw `ref(...)` argument harvested from `model`'s body to
    /// the qualified name it resolves to in this catalog. Used by the
    /// renderer's `ref()` builtin once the graph is known to be resolvable.
    pub fn resolved_refs_for(&self, model: &crate::model::Model) -> BTreeMap<String, QualifiedName> {
        model
            .references
            .iter()
            .filter_map(|raw| resolve_ref(self, raw).ok().map(|qn| (raw.clone(), qn)))
            .collect()
    }
}

pub(crate) fn resolve_ref(catalog: &Catalog, raw: &str) -> Result<QualifiedName, ()> {
    if raw.contains('.') {
        let (schema, name) = raw.split_once('.').unwrap();
        let qn = QualifiedName::new(schema, name);
        if catalog.contains(&qn) {
            return Ok(qn);
        }
        return Err(());
    }
    // Bare name: must be unambiguous across schemas, same rule as selectors.
    let matches: Vec<&QualifiedName> = catalog
        .models
        .keys()
        .chain(catalog.seeds.keys())
        .filter(|qn| qn.name == raw)
        .collect();
    match matches.as_slice() {
        [single] => Ok((*single).clone()),
        _ => Err(()),
    }
}

/// Scan `models_dir` and `seeds_dir`, populating a catalog. Per-file header
/// failures are collected as errors but don't abort the scan of other files;
/// a duplicate qualified name is likewise reported and the later definition
/// is dropped so the rest of the scan can proceed.
pub fn build(models_dir: &Path, seeds_dir: &Path) -> (Catalog, Errors) {
    let mut catalog = Catalog::default();
    let mut errors = Errors::default();

    if models_dir.is_dir() {
        let mut paths: Vec<_> = WalkDir::new(models_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "sql"))
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        for path in paths {
            match scan_model(models_dir, &path) {
                Ok(model) => {
                    if let Some(existing) = catalog.models.get(&model.qualified_name) {
                        errors.push(Error::new(Reason::DuplicateModel {
                            name: model.qualified_name.to_string(),
                            first: existing.source_path.clone(),
                            second: model.source_path.clone(),
                        }));
                        continue;
                    }
                    catalog.models.insert(model.qualified_name.clone(), model);
                }
                Err(e) => errors.push(e),
            }
        }
    }

    let (seed_list, seed_errors) = seeds::scan(seeds_dir);
    for seed in seed_list {
        catalog.seeds.insert(seed.qualified_name.clone(), seed);
    }
    errors.0.extend(seed_errors.0);

    (catalog, errors)
}

fn schema_from_path(root: &Path, file: &Path) -> String {
    seeds::schema_from_path(root, file)
}

fn scan_model(root: &Path, path: &Path) -> Result<Model, Error> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        Error::new(Reason::BadHeader {
            message: format!("could not read file: {e}"),
        })
    })?;

    let scanned = header::scan(path, &source)?;
    let stem = crate::error::file_stem_or(path, "model");
    let name = scanned.frontmatter.name.clone().unwrap_or(stem);
    let schema = scanned
        .frontmatter
        .schema
        .clone()
        .unwrap_or_else(|| schema_from_path(root, path));

    let references: Vec<String> = refs::harvest(&scanned.body).into_iter().collect();

    Ok(Model {
        qualified_name: QualifiedName::new(schema, name),
        source_path: path.to_path_buf(),
        frontmatter: scanned.frontmatter,
        body: scanned.body,
        references,
    })
}

pub fn materialization_requires_unique_key(m: Materialization) -> bool {
    matches!(m, Materialization::Incremental)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScratchDir;
    use std::fs;

    #[test]
    fn builds_catalog_from_directory_tree() {
        let dir = ScratchDir::new("stratum_catalog");
        let models = dir.path().join("models");
        fs::create_dir_all(models.join("staging")).unwrap();
        fs::write(
            models.join("staging/stg_orders.sql"),
            "select * from raw.orders",
        )
        .unwrap();
        fs::write(
            models.join("stg_customers.sql"),
            "select * from {{ ref(\"stg_orders\") }}",
        )
        .unwrap();

        let (catalog, errors) = build(&models, &dir.path().join("seeds"));
        assert!(errors.is_empty());
        assert_eq!(catalog.models().count(), 2);
        assert!(catalog.contains(&QualifiedName::new("staging", "stg_orders")));
    }

    #[test]
    fn duplicate_qualified_names_are_reported() {
        let dir = ScratchDir::new("stratum_catalog_dup");
        let models = dir.path().join("models");
        fs::create_dir_all(models.join("a")).unwrap();
        fs::create_dir_all(models.join("b")).unwrap();
        fs::write(models.join("a/x.sql"), "/*---\nschema: s\n---*/\nselect 1").unwrap();
        fs::write(models.join("b/x.sql"), "/*---\nschema: s\n---*/\nselect 2").unwrap();

        let (_, errors) = build(&models, &dir.path().join("seeds"));
        assert_eq!(errors.0.len(), 1);
        assert!(matches!(errors.0[0].reason, Reason::DuplicateModel { .. }));
    }
}
