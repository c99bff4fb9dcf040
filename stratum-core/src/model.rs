//! The data model shared by the catalog, renderer and orchestrator: models,
//! frontmatter and qualified names.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use strum_macros::{Display, EnumString};

/// `schema.name`, the identity of a model (or seed) throughout the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        QualifiedName {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Materialization {
    View,
    Table,
    Incremental,
    Ephemeral,
}

impl Default for Materialization {
    fn default() -> Self {
        Materialization::View
    }
}

/// One `{unique: [..]}` / `{not_null: [..]}` / `{accepted_values: {..}}` entry.
/// Structurally validated by the core; never executed.
#[derive(Debug, Clone, PartialEq)]
pub enum TestSpec {
    Unique(Vec<String>),
    NotNull(Vec<String>),
    AcceptedValues {
        column: String,
        values: Vec<YamlValue>,
    },
}

/// The parsed `/*--- ... ---*/` block. Unknown keys are preserved verbatim so
/// templates can still read them through `config`.
#[derive(Debug, Clone, Default)]
pub struct Frontmatter {
    pub name: Option<String>,
    pub materialized: Materialization,
    pub unique_key: Option<Vec<String>>,
    pub owner: Option<String>,
    pub schema: Option<String>,
    pub tags: Vec<String>,
    pub tests: Vec<TestSpec>,
    /// Every recognized and unrecognized key, exposed to templates as `config`.
    pub raw: BTreeMap<String, YamlValue>,
}

/// A single annotated SQL file. Immutable once constructed by the project
/// scan ("Models are created once per project scan, immutable
/// thereafter").
#[derive(Debug, Clone)]
pub struct Model {
    pub qualified_name: QualifiedName,
    pub source_path: PathBuf,
    pub frontmatter: Frontmatter,
    /// Body text after the closing `---*/` (or the whole file, if there was
    /// no header block).
    pub body: String,
    /// Names harvested by the fast-pass reference harvester.
    pub references: Vec<String>,
}

impl Model {
    pub fn header_line(&self) -> usize {
        // The header, if present, always starts at line 1; kept as a named
        // accessor so callers don't have to know that.
        1
    }
}

/// A seed file under `seeds/` ("File layout"). CSV seeds contribute
/// their header row as a column list so they can serve as lineage sources;
/// SQL seeds are treated like ephemeral models with no templating.
#[derive(Debug, Clone)]
pub struct Seed {
    pub qualified_name: QualifiedName,
    pub source_path: PathBuf,
    pub columns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_displays_as_schema_dot_name() {
        let qn = QualifiedName::new("staging", "orders");
        assert_eq!(qn.to_string(), "staging.orders");
    }

    #[test]
    fn materialization_defaults_to_view() {
        assert_eq!(Materialization::default(), Materialization::View);
    }

    #[test]
    fn materialization_parses_from_frontmatter_spelling() {
        use std::str::FromStr;
        assert_eq!(
            Materialization::from_str("incremental").unwrap(),
            Materialization::Incremental
        );
    }
}
