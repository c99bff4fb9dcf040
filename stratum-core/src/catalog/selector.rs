//! Selector grammar: exact name, bare name, `tag:<t>`, and
//! upstream/downstream closure via a leading/trailing `+`.

use std::collections::BTreeSet;
use std::fmt;

use super::{Catalog, Dag};
use crate::model::QualifiedName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Exact(QualifiedName),
    Bare(String),
    Tag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSelector {
    pub selector: Selector,
    pub upstream: bool,
    pub downstream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    NotFound(String),
    Ambiguous(String, Vec<String>),
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorError::NotFound(name) => write!(f, "no model matches selector `{name}`"),
            SelectorError::Ambiguous(name, candidates) => write!(
                f,
                "selector `{name}` is ambiguous between: {}",
                candidates.join(", ")
            ),
        }
    }
}

impl std::error::Error for SelectorError {}

pub fn parse(raw: &str) -> ParsedSelector {
    let mut s = raw;
    let upstream = s.starts_with('+');
    if upstream {
        s = &s[1..];
    }
    let downstream = s.ends_with('+');
    if downstream {
        s = &s[..s.len() - 1];
    }

    let selector = if let Some(tag) = s.strip_prefix("tag:") {
        Selector::Tag(tag.to_string())
    } else if s.contains('.') {
        let (schema, name) = s.split_once('.').unwrap();
        Selector::Exact(QualifiedName::new(schema, name))
    } else {
        Selector::Bare(s.to_string())
    };

    ParsedSelector {
        selector,
        upstream,
        downstream,
    }
}

/// Resolve a selector to its initial set of matching models, with no
/// upstream/downstream expansion yet.
fn initial_set(catalog: &Catalog, selector: &Selector) -> Result<BTreeSet<QualifiedName>, SelectorError> {
    match selector {
        Selector::Exact(qn) => {
            if catalog.contains(qn) {
                Ok(BTreeSet::from([qn.clone()]))
            } else {
                Err(SelectorError::NotFound(qn.to_string()))
            }
        }
        Selector::Bare(name) => Ok(BTreeSet::from([catalog.resolve_bare(name)?.clone()])),
        Selector::Tag(tag) => {
            let matches: BTreeSet<QualifiedName> =
                catalog.models_with_tag(tag).cloned().collect();
            Ok(matches)
        }
    }
}

/// `select(selectors, downstream, upstream)`. The global
/// `downstream`/`upstream` flags apply on top of any selector-local `+`.
/// The result is restricted to, and returned in, topological order.
pub fn select(
    catalog: &Catalog,
    dag: &Dag,
    selectors: &[&str],
    global_upstream: bool,
    global_downstream: bool,
) -> Result<Vec<QualifiedName>, SelectorError> {
    let mut selected: BTreeSet<QualifiedName> = BTreeSet::new();

    for raw in selectors {
        let parsed = parse(raw);
        let base = initial_set(catalog, &parsed.selector)?;

        for node in &base {
            selected.insert(node.clone());
            if parsed.upstream || global_upstream {
                selected.extend(dag.upstream_closure(node));
            }
            if parsed.downstream || global_downstream {
                selected.extend(dag.downstream_closure(node));
            }
        }
    }

    let ordered = dag
        .order()
        .0
        .iter()
        .filter(|n| selected.contains(n))
        .cloned()
        .collect();

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_closure_forms() {
        let p = parse("+staging.stg_orders+");
        assert!(p.upstream && p.downstream);
        assert_eq!(
            p.selector,
            Selector::Exact(QualifiedName::new("staging", "stg_orders"))
        );

        let p = parse("tag:daily");
        assert_eq!(p.selector, Selector::Tag("daily".to_string()));
        assert!(!p.upstream && !p.downstream);

        let p = parse("stg_orders");
        assert_eq!(p.selector, Selector::Bare("stg_orders".to_string()));
    }
}
