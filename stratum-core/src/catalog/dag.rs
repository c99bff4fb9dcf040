//! The reference graph over a catalog's models. Cycle detection uses the classic white/gray/black DFS
//! coloring; topological order ties are broken lexicographically by
//! qualified name so builds are deterministic.

use std::collections::BTreeMap;

use crate::error::{Error, Reason};
use crate::model::QualifiedName;

#[derive(Debug, Clone)]
pub struct Dag {
    /// model -> its dependencies (edges point dependent -> dependency).
    edges: BTreeMap<QualifiedName, Vec<QualifiedName>>,
    /// model -> models that depend on it (the reverse index, used by
    /// upstream/downstream closure in selectors).
    reverse: BTreeMap<QualifiedName, Vec<QualifiedName>>,
    order: TopoOrder,
}

/// Dependencies-before-dependents order over the whole graph.
#[derive(Debug, Clone)]
pub struct TopoOrder(pub Vec<QualifiedName>);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl Dag {
    pub fn build(edges: BTreeMap<QualifiedName, Vec<QualifiedName>>) -> Result<Self, Error> {
        let mut reverse: BTreeMap<QualifiedName, Vec<QualifiedName>> = BTreeMap::new();
        for node in edges.keys() {
            reverse.entry(node.clone()).or_default();
        }
        for (dependent, deps) in &edges {
            for dep in deps {
                reverse.entry(dep.clone()).or_default().push(dependent.clone());
            }
        }
        for deps in reverse.values_mut() {
            deps.sort();
        }

        let order = topo_sort(&edges)?;

        Ok(Dag {
            edges,
            reverse,
            order,
        })
    }

    pub fn order(&self) -> &TopoOrder {
        &self.order
    }

    pub fn dependencies(&self, node: &QualifiedName) -> &[QualifiedName] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, node: &QualifiedName) -> &[QualifiedName] {
        self.reverse.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, node: &QualifiedName) -> bool {
        self.edges.contains_key(node)
    }

    /// All ancestors of `start` (its transitive dependencies), itself included.
    pub fn upstream_closure(&self, start: &QualifiedName) -> Vec<QualifiedName> {
        self.closure(start, |n| self.dependencies(n))
    }

    /// All descendants of `start` (everything that transitively depends on
    /// it), itself included.
    pub fn downstream_closure(&self, start: &QualifiedName) -> Vec<QualifiedName> {
        self.closure(start, |n| self.dependents(n))
    }

    fn closure<'a, F>(&'a self, start: &QualifiedName, neighbors: F) -> Vec<QualifiedName>
    where
        F: Fn(&QualifiedName) -> &'a [QualifiedName],
    {
        let mut seen = std::collections::BTreeSet::new();
        let mut stack = vec![start.clone()];
        while let Some(node) = stack.pop() {
            if seen.insert(node.clone()) {
                for next in neighbors(&node) {
                    stack.push(next.clone());
                }
            }
        }
        seen.into_iter().collect()
    }
}

fn topo_sort(edges: &BTreeMap<QualifiedName, Vec<QualifiedName>>) -> Result<TopoOrder, Error> {
    let mut color: BTreeMap<QualifiedName, Color> =
        edges.keys().map(|n| (n.clone(), Color::White)).collect();
    let mut order = Vec::with_capacity(edges.len());
    let mut path = Vec::new();

    // Deterministic visit order: sorted keys, and each node's own
    // dependency list is visited in lexicographic order too (callers build
    // `edges` from a BTreeMap already, but the inner Vec may not be sorted).
    let mut nodes: Vec<&QualifiedName> = edges.keys().collect();
    nodes.sort();

    for start in nodes {
        if color[start] == Color::White {
            visit(start, edges, &mut color, &mut path, &mut order)?;
        }
    }

    Ok(TopoOrder(order))
}

fn visit(
    node: &QualifiedName,
    edges: &BTreeMap<QualifiedName, Vec<QualifiedName>>,
    color: &mut BTreeMap<QualifiedName, Color>,
    path: &mut Vec<QualifiedName>,
    order: &mut Vec<QualifiedName>,
) -> Result<(), Error> {
    color.insert(node.clone(), Color::Gray);
    path.push(node.clone());

    let mut deps: Vec<&QualifiedName> = edges.get(node).into_iter().flatten().collect();
    deps.sort();

    for dep in deps {
        match color.get(dep).copied().unwrap_or(Color::Black) {
            Color::White => visit(dep, edges, color, path, order)?,
            Color::Gray => {
                let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[cycle_start..].iter().map(|n| n.to_string()).collect();
                cycle.push(dep.to_string());
                return Err(Error::new(Reason::CycleDetected { path: cycle }));
            }
            Color::Black => {}
        }
    }

    path.pop();
    color.insert(node.clone(), Color::Black);
    order.push(node.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qn(s: &str) -> QualifiedName {
        let (schema, name) = s.split_once('.').unwrap();
        QualifiedName::new(schema, name)
    }

    #[test]
    fn topo_order_places_dependencies_first() {
        let mut edges = BTreeMap::new();
        edges.insert(qn("s.a"), vec![qn("s.b")]);
        edges.insert(qn("s.b"), vec![qn("s.c")]);
        edges.insert(qn("s.c"), vec![]);

        let dag = Dag::build(edges).unwrap();
        let order: Vec<String> = dag.order().0.iter().map(|n| n.to_string()).collect();
        assert_eq!(order, vec!["s.c", "s.b", "s.a"]);
    }

    #[test]
    fn ties_are_broken_lexicographically() {
        let mut edges = BTreeMap::new();
        edges.insert(qn("s.z"), vec![]);
        edges.insert(qn("s.a"), vec![]);
        edges.insert(qn("s.m"), vec![]);

        let dag = Dag::build(edges).unwrap();
        let order: Vec<String> = dag.order().0.iter().map(|n| n.to_string()).collect();
        assert_eq!(order, vec!["s.a", "s.m", "s.z"]);
    }

    #[test]
    fn cycles_are_reported_with_full_path() {
        let mut edges = BTreeMap::new();
        edges.insert(qn("s.a"), vec![qn("s.b")]);
        edges.insert(qn("s.b"), vec![qn("s.a")]);

        let err = Dag::build(edges).unwrap_err();
        match err.reason {
            Reason::CycleDetected { path } => assert!(path.len() >= 2),
            _ => panic!("expected CycleDetected"),
        }
    }

    #[test]
    fn upstream_and_downstream_closures() {
        let mut edges = BTreeMap::new();
        edges.insert(qn("s.a"), vec![qn("s.b")]);
        edges.insert(qn("s.b"), vec![qn("s.c")]);
        edges.insert(qn("s.c"), vec![]);
        let dag = Dag::build(edges).unwrap();

        let up = dag.upstream_closure(&qn("s.a"));
        assert!(up.contains(&qn("s.b")) && up.contains(&qn("s.c")));

        let down = dag.downstream_closure(&qn("s.c"));
        assert!(down.contains(&qn("s.a")) && down.contains(&qn("s.b")));
    }
}
