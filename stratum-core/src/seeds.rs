//! Seed ingestion. A seed is a
//! flat-file dataset that can be `ref()`'d like a model: `.csv` seeds
//! contribute their header row as a column list so they can serve as lineage
//! sources, `.sql` seeds are registered with no columns (same as an
//! `ephemeral` model with no templating).

use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Error, Errors, Reason};
use crate::model::{QualifiedName, Seed};

/// Walks `seeds_dir` (recursively) for `*.csv`/`*.sql` files and registers
/// one [`Seed`] per file, using the same directory-derived-schema rule as
/// models. A missing directory yields no seeds and no errors.
pub fn scan(seeds_dir: &Path) -> (Vec<Seed>, Errors) {
    let mut seeds = Vec::new();
    let mut errors = Errors::default();

    if !seeds_dir.is_dir() {
        return (seeds, errors);
    }

    for entry in WalkDir::new(seeds_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.into_path();
        let is_csv = path.extension().map_or(false, |ext| ext == "csv");
        let is_sql = path.extension().map_or(false, |ext| ext == "sql");
        if !is_csv && !is_sql {
            continue;
        }
        match scan_one(seeds_dir, &path) {
            Ok(seed) => seeds.push(seed),
            Err(e) => errors.push(e),
        }
    }

    (seeds, errors)
}

fn scan_one(root: &Path, path: &Path) -> Result<Seed, Error> {
    let schema = schema_from_path(root, path);
    let name = crate::error::file_stem_or(path, "seed");

    let columns = if path.extension().map_or(false, |e| e == "csv") {
        read_csv_header(path)?
    } else {
        Vec::new()
    };

    Ok(Seed {
        qualified_name: QualifiedName::new(schema, name),
        source_path: path.to_path_buf(),
        columns,
    })
}

fn read_csv_header(path: &Path) -> Result<Vec<String>, Error> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        Error::new(Reason::BadHeader {
            message: format!("could not read seed csv: {e}"),
        })
    })?;
    let headers = reader.headers().map_err(|e| {
        Error::new(Reason::BadHeader {
            message: format!("could not read seed csv header: {e}"),
        })
    })?;
    Ok(headers.iter().map(String::from).collect())
}

/// Same rule as models: directory segments between the seeds root
/// and the file form the schema.
pub(crate) fn schema_from_path(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .ok()
        .and_then(|rel| rel.parent())
        .map(|dir| {
            dir.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(".")
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScratchDir;
    use std::fs;

    #[test]
    fn missing_seeds_dir_yields_no_seeds_and_no_errors() {
        let dir = ScratchDir::new("stratum_seeds");
        let (seeds, errors) = scan(&dir.path().join("does-not-exist"));
        assert!(seeds.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn csv_seed_contributes_header_row_as_columns() {
        let dir = ScratchDir::new("stratum_seeds");
        fs::create_dir_all(dir.path().join("raw")).unwrap();
        fs::write(dir.path().join("raw/countries.csv"), "code,name\nUS,United States\n").unwrap();

        let (seeds, errors) = scan(dir.path());
        assert!(errors.is_empty());
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].qualified_name, QualifiedName::new("raw", "countries"));
        assert_eq!(seeds[0].columns, vec!["code", "name"]);
    }

    #[test]
    fn sql_seed_has_no_columns() {
        let dir = ScratchDir::new("stratum_seeds");
        fs::write(dir.path().join("static_lookup.sql"), "select 1 as x").unwrap();

        let (seeds, errors) = scan(dir.path());
        assert!(errors.is_empty());
        assert_eq!(seeds.len(), 1);
        assert!(seeds[0].columns.is_empty());
    }
}
