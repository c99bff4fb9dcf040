//! Assembles the global namespace exposed to every template and macro
//! invocation: `config`, `env`, `target`, `this`, the `ref` builtin, and one
//! entry per loaded macro namespace.

use std::collections::BTreeMap;

use crate::macros::MacroModule;
use crate::model::{Frontmatter, Materialization, QualifiedName};
use crate::runtime::value::{Record, Value};

/// The connection a run is targeting — exposed as `target.type` /
/// `target.schema` / `target.database`.
#[derive(Debug, Clone)]
pub struct Target {
    pub type_: String,
    pub schema: String,
    pub database: String,
}

/// Engine-wide settings a run is parameterized by.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub env: String,
    pub target: Target,
}

/// Builds the base globals shared by every model render in a run: `env`,
/// `target`, `ref`, and one entry per registered macro namespace.
/// Per-model globals (`config`, `this`) are layered on top by [`for_model`].
pub fn base_globals(params: &RunParams, macros: &[MacroModule]) -> BTreeMap<String, Value> {
    let mut globals = BTreeMap::new();
    globals.insert("env".to_string(), Value::Str(params.env.clone()));
    globals.insert(
        "target".to_string(),
        Value::Record(std::rc::Rc::new(Record::new([
            ("type", params.target.type_.clone()),
            ("schema", params.target.schema.clone()),
            ("database", params.target.database.clone()),
        ]))),
    );
    globals.insert("ref".to_string(), Value::Native("ref"));
    for module in macros {
        globals.insert(
            module.namespace.name.clone(),
            Value::Namespace(std::rc::Rc::new(module.namespace.clone())),
        );
    }
    globals
}

/// Extends a base global set with the per-model `config` (the frontmatter's
/// raw key/value map) and `this` (`.name`/`.schema` of the model being
/// rendered).
pub fn for_model(
    base: &BTreeMap<String, Value>,
    frontmatter: &Frontmatter,
    qualified_name: &QualifiedName,
) -> BTreeMap<String, Value> {
    let mut globals = base.clone();
    globals.insert("config".to_string(), config_value(frontmatter));
    globals.insert(
        "this".to_string(),
        Value::Record(std::rc::Rc::new(Record::new([
            ("name", qualified_name.name.clone()),
            ("schema", qualified_name.schema.clone()),
        ]))),
    );
    globals
}

fn config_value(frontmatter: &Frontmatter) -> Value {
    let mut pairs = Vec::new();
    for (k, v) in &frontmatter.raw {
        pairs.push((Value::Str(k.clone()), yaml_to_value(v)));
    }
    // `materialized` is always present, even if the header omitted it.
    if !frontmatter.raw.contains_key("materialized") {
        pairs.push((
            Value::Str("materialized".to_string()),
            Value::Str(frontmatter.materialized.to_string()),
        ));
    }
    Value::Dict(pairs)
}

fn yaml_to_value(v: &serde_yaml::Value) -> Value {
    match v {
        serde_yaml::Value::Null => Value::None,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_yaml::Value::String(s) => Value::Str(s.clone()),
        serde_yaml::Value::Sequence(items) => Value::List(items.iter().map(yaml_to_value).collect()),
        serde_yaml::Value::Mapping(map) => Value::Dict(
            map.iter()
                .map(|(k, v)| (yaml_to_value(k), yaml_to_value(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(t) => yaml_to_value(&t.value),
    }
}

#[allow(unused_imports)]
fn _assert_materialization_display_is_snake_case(m: Materialization) -> String {
    m.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    #[test]
    fn base_globals_exposes_env_target_and_ref() {
        let params = RunParams {
            env: "dev".to_string(),
            target: Target {
                type_: "duckdb".to_string(),
                schema: "analytics".to_string(),
                database: "main".to_string(),
            },
        };
        let globals = base_globals(&params, &[]);
        assert!(matches!(globals.get("env"), Some(Value::Str(s)) if s == "dev"));
        match globals.get("target") {
            Some(Value::Record(r)) => {
                assert!(matches!(r.get("schema"), Some(Value::Str(s)) if s == "analytics"));
            }
            _ => panic!("expected target to be a record"),
        }
        assert!(matches!(globals.get("ref"), Some(Value::Native("ref"))));
    }

    #[test]
    fn for_model_exposes_config_and_this() {
        let base: Map<String, Value> = Map::new();
        let mut fm = Frontmatter::default();
        fm.raw.insert("owner".to_string(), serde_yaml::Value::String("alice".to_string()));
        let qn = QualifiedName::new("staging", "orders");
        let globals = for_model(&base, &fm, &qn);
        assert!(globals.contains_key("config"));
        match globals.get("this") {
            Some(Value::Record(r)) => {
                assert!(matches!(r.get("name"), Some(Value::Str(s)) if s == "orders"));
                assert!(matches!(r.get("schema"), Some(Value::Str(s)) if s == "staging"));
            }
            _ => panic!("expected this to be a record"),
        }
    }
}
