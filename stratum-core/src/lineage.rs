//! Column lineage extractor: reparses a fully rendered SQL
//! string with an off-the-shelf parser and walks the resulting tree to
//! recover source tables and per-output-column provenance. Runs strictly
//! after rendering, so it never sees templating constructs; purely
//! functional in `(sql, schema)`.

use std::collections::BTreeSet;

use sqlparser::ast::{
    Expr as SqlExpr, Function, FunctionArg, FunctionArgExpr, Ident, ObjectName, Query, Select,
    SelectItem, SetExpr, Statement, TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use crate::error::{Error, Reason};

/// How a column's output value was derived from its source(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Direct,
    Expression,
}

/// One physical-table column an output column is traced back to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Source {
    pub table: String,
    pub column: String,
}

/// Provenance of a single output column of a rendered query.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLineage {
    pub name: String,
    pub transform: Transform,
    pub function: Option<String>,
    pub sources: Vec<Source>,
}

/// Sources and per-column provenance of one rendered SQL statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lineage {
    pub sources: BTreeSet<String>,
    pub columns: Vec<ColumnLineage>,
}

/// Known columns of referenced physical tables, used to expand `SELECT *`
/// ("Star expansion"). A table absent from this map falls back
/// to a single column named `*` wherever it's wildcarded.
pub type Schema = std::collections::BTreeMap<String, Vec<String>>;

/// Reparses `sql` and extracts its lineage against `schema`. A parse
/// failure or a statement that isn't a query is an [`ExtractError`]
///, non-fatal to the rest of a build.
///
/// [`ExtractError`]: crate::error::Reason::ExtractError
pub fn extract(sql: &str, schema: &Schema) -> Result<Lineage, Error> {
    let dialect = GenericDialect {};
    let statements = SqlParser::parse_sql(&dialect, sql)
        .map_err(|e| Error::new(Reason::ExtractError { message: e.to_string() }))?;

    let query = statements
        .into_iter()
        .find_map(|stmt| match stmt {
            Statement::Query(q) => Some(*q),
            _ => None,
        })
        .ok_or_else(|| Error::new(Reason::ExtractError { message: "no query statement found".to_string() }))?;

    let mut ctx = Ctx { schema, ctes: Vec::new() };
    ctx.lineage_of_query(&query)
}

/// What a `FROM`-clause entry resolves to: either a physical table (whose
/// columns are looked up in `schema`, if known) or a local scope (a CTE or
/// derived subquery) whose own column lineage has already been computed.
enum TableScope {
    Physical(String),
    Known(Lineage),
}

struct Ctx<'a> {
    schema: &'a Schema,
    /// CTE lineages computed so far, in `WITH`-clause declaration order so a
    /// later CTE can reference an earlier one ("CTEs").
    ctes: Vec<(String, Lineage)>,
}

impl<'a> Ctx<'a> {
    fn lineage_of_query(&mut self, query: &Query) -> Result<Lineage, Error> {
        let cte_floor = self.ctes.len();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let lineage = self.lineage_of_query(&cte.query)?;
                self.ctes.push((cte.alias.name.value.clone(), lineage));
            }
        }
        let result = self.lineage_of_set_expr(&query.body);
        self.ctes.truncate(cte_floor);
        result
    }

    fn lineage_of_set_expr(&mut self, set_expr: &SetExpr) -> Result<Lineage, Error> {
        match set_expr {
            SetExpr::Select(select) => self.lineage_of_select(select),
            SetExpr::Query(q) => self.lineage_of_query(q),
            SetExpr::SetOperation { left, right, .. } => {
                let l = self.lineage_of_set_expr(left)?;
                let r = self.lineage_of_set_expr(right)?;
                Ok(merge_set_operation(l, r))
            }
            other => Err(Error::new(Reason::ExtractError {
                message: format!("unsupported query body `{other:?}`"),
            })),
        }
    }

    fn lineage_of_select(&mut self, select: &Select) -> Result<Lineage, Error> {
        let mut scope: Vec<(String, TableScope)> = Vec::new();
        let mut sources = BTreeSet::new();
        for twj in &select.from {
            self.register_table_factor(&twj.relation, &mut scope, &mut sources)?;
            for join in &twj.joins {
                self.register_table_factor(&join.relation, &mut scope, &mut sources)?;
            }
        }

        let mut columns = Vec::new();
        for item in &select.projection {
            columns.extend(self.lineage_of_select_item(item, &scope)?);
        }

        Ok(Lineage { sources, columns })
    }

    fn register_table_factor(
        &mut self,
        factor: &TableFactor,
        scope: &mut Vec<(String, TableScope)>,
        sources: &mut BTreeSet<String>,
    ) -> Result<(), Error> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let qualified = object_name_to_string(name);
                let bound_name = alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_else(|| last_part(name));
                if let Some((_, lineage)) = self.ctes.iter().rev().find(|(n, _)| *n == qualified || *n == bound_name) {
                    sources.extend(lineage.sources.iter().cloned());
                    scope.push((bound_name, TableScope::Known(lineage.clone())));
                } else {
                    sources.insert(qualified.clone());
                    scope.push((bound_name, TableScope::Physical(qualified)));
                }
                Ok(())
            }
            TableFactor::Derived { subquery, alias, .. } => {
                let lineage = self.lineage_of_query(subquery)?;
                let bound_name = alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_else(|| "__derived".to_string());
                sources.extend(lineage.sources.iter().cloned());
                scope.push((bound_name, TableScope::Known(lineage)));
                Ok(())
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.register_table_factor(&table_with_joins.relation, scope, sources)?;
                for join in &table_with_joins.joins {
                    self.register_table_factor(&join.relation, scope, sources)?;
                }
                Ok(())
            }
            other => Err(Error::new(Reason::ExtractError {
                message: format!("unsupported table expression `{other:?}`"),
            })),
        }
    }

    fn lineage_of_select_item(&self, item: &SelectItem, scope: &[(String, TableScope)]) -> Result<Vec<ColumnLineage>, Error> {
        match item {
            SelectItem::UnnamedExpr(expr) => Ok(vec![self.classify(&expr_default_name(expr), expr, scope)]),
            SelectItem::ExprWithAlias { expr, alias } => Ok(vec![self.classify(&alias.value, expr, scope)]),
            SelectItem::Wildcard(_) => Ok(self.expand_wildcard(None, scope)),
            SelectItem::QualifiedWildcard(name, _) => Ok(self.expand_wildcard(Some(&last_part(name)), scope)),
        }
    }

    fn expand_wildcard(&self, only_table: Option<&str>, scope: &[(String, TableScope)]) -> Vec<ColumnLineage> {
        let mut columns = Vec::new();
        for (alias, table) in scope {
            if let Some(only) = only_table {
                if alias != only {
                    continue;
                }
            }
            match table {
                TableScope::Physical(qualified) => {
                    if let Some(cols) = self.schema.get(qualified).or_else(|| self.schema.get(alias)) {
                        columns.extend(cols.iter().map(|col| ColumnLineage {
                            name: col.clone(),
                            transform: Transform::Direct,
                            function: None,
                            sources: vec![Source { table: qualified.clone(), column: col.clone() }],
                        }));
                    }
                }
                TableScope::Known(lineage) => columns.extend(lineage.columns.clone()),
            }
        }
        if columns.is_empty() {
            columns.push(star_column());
        }
        columns
    }

    /// Classifies one projection expression, resolving bare/qualified column
    /// references against `scope` and propagating a CTE's own classification
    /// through a bare reference to one of its columns ("CTEs").
    fn classify(&self, name: &str, expr: &SqlExpr, scope: &[(String, TableScope)]) -> ColumnLineage {
        if let Some((table, column)) = bare_column(expr) {
            return self.classify_bare(name, table.as_deref(), &column, scope);
        }
        if let SqlExpr::Nested(inner) = expr {
            return self.classify(name, inner, scope);
        }
        if let SqlExpr::Function(func) = expr {
            if let Some(arg) = direct_scalar_arg(func) {
                let (table, column) = bare_column(arg).expect("direct_scalar_arg only returns bare columns");
                let resolved = self.classify_bare("_", table.as_deref(), &column, scope);
                return ColumnLineage {
                    name: name.to_string(),
                    transform: Transform::Direct,
                    function: Some(function_name(func)),
                    sources: resolved.sources,
                };
            }
        }
        let mut sources = BTreeSet::new();
        self.collect_expr_sources(expr, scope, &mut sources);
        ColumnLineage {
            name: name.to_string(),
            transform: Transform::Expression,
            function: function_call_name(expr),
            sources: sources.into_iter().collect(),
        }
    }

    fn classify_bare(&self, name: &str, table: Option<&str>, column: &str, scope: &[(String, TableScope)]) -> ColumnLineage {
        let found = match table {
            Some(alias) => scope.iter().find(|(a, _)| a == alias).map(|(_, t)| t),
            None => scope.iter().map(|(_, t)| t).find(|t| !self.resolve_in_table(t, column).is_empty()),
        };
        match found {
            Some(TableScope::Known(lineage)) => match lineage.columns.iter().find(|c| c.name == column) {
                Some(inner) => ColumnLineage {
                    name: name.to_string(),
                    transform: inner.transform,
                    function: inner.function.clone(),
                    sources: inner.sources.clone(),
                },
                None => ColumnLineage { name: name.to_string(), transform: Transform::Direct, function: None, sources: Vec::new() },
            },
            Some(TableScope::Physical(qualified)) => ColumnLineage {
                name: name.to_string(),
                transform: Transform::Direct,
                function: None,
                sources: vec![Source { table: qualified.clone(), column: column.to_string() }],
            },
            None => ColumnLineage { name: name.to_string(), transform: Transform::Direct, function: None, sources: Vec::new() },
        }
    }

    fn resolve_in_table(&self, table: &TableScope, column: &str) -> Vec<Source> {
        match table {
            TableScope::Physical(qualified) => vec![Source { table: qualified.clone(), column: column.to_string() }],
            TableScope::Known(lineage) => lineage.columns.iter().find(|c| c.name == column).map(|c| c.sources.clone()).unwrap_or_default(),
        }
    }

    fn collect_expr_sources(&self, expr: &SqlExpr, scope: &[(String, TableScope)], acc: &mut BTreeSet<Source>) {
        match expr {
            SqlExpr::Identifier(ident) => acc.extend(self.classify_bare("_", None, &ident.value, scope).sources),
            SqlExpr::CompoundIdentifier(parts) => {
                let (table, column) = split_compound(parts);
                acc.extend(self.classify_bare("_", Some(&table), &column, scope).sources);
            }
            SqlExpr::BinaryOp { left, right, .. } => {
                self.collect_expr_sources(left, scope, acc);
                self.collect_expr_sources(right, scope, acc);
            }
            SqlExpr::UnaryOp { expr, .. } | SqlExpr::Nested(expr) | SqlExpr::Cast { expr, .. } => {
                self.collect_expr_sources(expr, scope, acc);
            }
            SqlExpr::Case { operand, conditions, results, else_result } => {
                if let Some(e) = operand {
                    self.collect_expr_sources(e, scope, acc);
                }
                for e in conditions.iter().chain(results.iter()) {
                    self.collect_expr_sources(e, scope, acc);
                }
                if let Some(e) = else_result {
                    self.collect_expr_sources(e, scope, acc);
                }
            }
            SqlExpr::Function(func) => {
                for arg in &func.args {
                    let inner = match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Some(e),
                        FunctionArg::Named { arg: FunctionArgExpr::Expr(e), .. } => Some(e),
                        _ => None,
                    };
                    if let Some(e) = inner {
                        self.collect_expr_sources(e, scope, acc);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Positional union of two branches' output columns ("Set
/// operations"): always `Expression`, sources are the union of both sides.
fn merge_set_operation(left: Lineage, right: Lineage) -> Lineage {
    let sources: BTreeSet<String> = left.sources.union(&right.sources).cloned().collect();
    let columns = left
        .columns
        .iter()
        .zip(right.columns.iter())
        .map(|(l, r)| {
            let mut sources: BTreeSet<Source> = l.sources.iter().cloned().collect();
            sources.extend(r.sources.iter().cloned());
            ColumnLineage {
                name: l.name.clone(),
                transform: Transform::Expression,
                function: None,
                sources: sources.into_iter().collect(),
            }
        })
        .collect();
    Lineage { sources, columns }
}

fn bare_column(expr: &SqlExpr) -> Option<(Option<String>, String)> {
    match expr {
        SqlExpr::Identifier(ident) => Some((None, ident.value.clone())),
        SqlExpr::CompoundIdentifier(parts) => {
            let (table, column) = split_compound(parts);
            Some((Some(table), column))
        }
        _ => None,
    }
}

/// `UPPER(col)`/`LOWER(col)`/`TRIM(col)` over a single bare column classify
/// as `Direct`; anything else involving a function is `Expression`.
fn direct_scalar_arg(func: &Function) -> Option<&SqlExpr> {
    const SCALARS: &[&str] = &["UPPER", "LOWER", "TRIM"];
    if func.args.len() != 1 || func.over.is_some() || func.distinct {
        return None;
    }
    if !SCALARS.contains(&function_name(func).to_uppercase().as_str()) {
        return None;
    }
    match &func.args[0] {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) if bare_column(e).is_some() => Some(e),
        _ => None,
    }
}

fn function_call_name(expr: &SqlExpr) -> Option<String> {
    match expr {
        SqlExpr::Function(func) => Some(function_name(func)),
        _ => None,
    }
}

fn function_name(func: &Function) -> String {
    object_name_to_string(&func.name)
}

fn split_compound(parts: &[Ident]) -> (String, String) {
    match parts {
        [table, column] => (table.value.clone(), column.value.clone()),
        _ => {
            let column = parts.last().map(|i| i.value.clone()).unwrap_or_default();
            let table = parts[..parts.len().saturating_sub(1)].iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".");
            (table, column)
        }
    }
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".")
}

fn last_part(name: &ObjectName) -> String {
    name.0.last().map(|i| i.value.clone()).unwrap_or_default()
}

fn star_column() -> ColumnLineage {
    ColumnLineage { name: "*".to_string(), transform: Transform::Expression, function: None, sources: Vec::new() }
}

/// The name an unaliased projection expression takes (matches common SQL
/// engine behavior: bare columns keep their name, everything else falls
/// back to its source text).
fn expr_default_name(expr: &SqlExpr) -> String {
    match expr {
        SqlExpr::Identifier(ident) => ident.value.clone(),
        SqlExpr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.clone()).unwrap_or_default(),
        SqlExpr::Function(func) => function_name(func),
        other => format!("{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(pairs: &[(&str, &[&str])]) -> Schema {
        pairs.iter().map(|(t, cols)| (t.to_string(), cols.iter().map(|c| c.to_string()).collect())).collect()
    }

    #[test]
    fn direct_column_and_aggregate_classification() {
        let lineage = extract(
            "SELECT u.id, UPPER(u.name) AS n, COUNT(*) AS c FROM users u GROUP BY u.id",
            &Schema::new(),
        )
        .unwrap();
        assert_eq!(lineage.sources, BTreeSet::from(["users".to_string()]));
        assert_eq!(lineage.columns.len(), 3);

        assert_eq!(lineage.columns[0].name, "id");
        assert_eq!(lineage.columns[0].transform, Transform::Direct);
        assert_eq!(lineage.columns[0].sources, vec![Source { table: "users".to_string(), column: "id".to_string() }]);

        assert_eq!(lineage.columns[1].name, "n");
        assert_eq!(lineage.columns[1].transform, Transform::Direct);
        assert_eq!(lineage.columns[1].function.as_deref(), Some("UPPER"));
        assert_eq!(lineage.columns[1].sources, vec![Source { table: "users".to_string(), column: "name".to_string() }]);

        assert_eq!(lineage.columns[2].name, "c");
        assert_eq!(lineage.columns[2].transform, Transform::Expression);
        assert_eq!(lineage.columns[2].function.as_deref(), Some("COUNT"));
        assert!(lineage.columns[2].sources.is_empty());
    }

    #[test]
    fn cte_propagates_direct_classification_to_physical_source() {
        let lineage = extract("WITH s AS (SELECT id FROM users) SELECT s.id FROM s", &Schema::new()).unwrap();
        assert_eq!(lineage.sources, BTreeSet::from(["users".to_string()]));
        assert_eq!(lineage.columns.len(), 1);
        assert_eq!(lineage.columns[0].transform, Transform::Direct);
        assert_eq!(lineage.columns[0].sources, vec![Source { table: "users".to_string(), column: "id".to_string() }]);
    }

    #[test]
    fn cte_propagates_expression_classification() {
        let lineage = extract("WITH s AS (SELECT COUNT(*) AS c FROM users) SELECT s.c FROM s", &Schema::new()).unwrap();
        assert_eq!(lineage.columns[0].transform, Transform::Expression);
        assert!(lineage.columns[0].sources.is_empty());
    }

    #[test]
    fn set_operation_is_positional_union_and_always_expression() {
        let lineage = extract("SELECT a FROM t1 UNION SELECT b FROM t2", &Schema::new()).unwrap();
        assert_eq!(lineage.sources, BTreeSet::from(["t1".to_string(), "t2".to_string()]));
        assert_eq!(lineage.columns.len(), 1);
        assert_eq!(lineage.columns[0].name, "a");
        assert_eq!(lineage.columns[0].transform, Transform::Expression);
        let mut sources = lineage.columns[0].sources.clone();
        sources.sort();
        assert_eq!(
            sources,
            vec![Source { table: "t1".to_string(), column: "a".to_string() }, Source { table: "t2".to_string(), column: "b".to_string() }]
        );
    }

    #[test]
    fn star_without_schema_is_a_single_named_column() {
        let lineage = extract("SELECT * FROM users", &Schema::new()).unwrap();
        assert_eq!(lineage.columns.len(), 1);
        assert_eq!(lineage.columns[0].name, "*");
    }

    #[test]
    fn star_with_schema_expands_to_declared_columns() {
        let s = schema(&[("users", &["id", "name"])]);
        let lineage = extract("SELECT * FROM users", &s).unwrap();
        assert_eq!(lineage.columns.len(), 2);
        assert_eq!(lineage.columns[0].name, "id");
        assert_eq!(lineage.columns[1].name, "name");
        assert!(lineage.columns.iter().all(|c| c.transform == Transform::Direct));
    }

    #[test]
    fn qualified_wildcard_restricts_to_one_table() {
        let s = schema(&[("users", &["id"]), ("orders", &["id", "total"])]);
        let lineage = extract("SELECT o.* FROM users u JOIN orders o ON u.id = o.id", &s).unwrap();
        assert_eq!(lineage.columns.len(), 2);
        assert!(lineage.columns.iter().all(|c| c.sources[0].table == "orders"));
    }

    #[test]
    fn binary_expression_collects_both_sources() {
        let lineage = extract("SELECT u.a + u.b AS total FROM users u", &Schema::new()).unwrap();
        assert_eq!(lineage.columns[0].transform, Transform::Expression);
        let mut sources = lineage.columns[0].sources.clone();
        sources.sort();
        assert_eq!(
            sources,
            vec![Source { table: "users".to_string(), column: "a".to_string() }, Source { table: "users".to_string(), column: "b".to_string() }]
        );
    }

    #[test]
    fn malformed_sql_is_an_extract_error() {
        let err = extract("SELEC * FROM users", &Schema::new()).unwrap_err();
        assert!(matches!(err.reason, Reason::ExtractError { .. }));
    }
}
