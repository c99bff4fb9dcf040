//! Renderer: interprets a parsed template against an execution
//! context, producing the final SQL string.

use std::path::Path;

use crate::error::{Error, Position, Reason};
use crate::runtime::eval::{as_iterable, eval, eval_stringified, EvalContext, Locals};
use crate::runtime::expr_parser::parse_expr;
use crate::template::ast::Node;
use crate::template::parser::parse;

/// Parses and renders `source` against `ctx`, attaching `file` to any error
/// raised along the way (the caller knows which model's body this is; the
/// template pipeline itself is file-agnostic so it can also render bare
/// strings in tests).
pub fn render(source: &str, ctx: &EvalContext, file: Option<&Path>) -> Result<String, Error> {
    let nodes = parse(source).map_err(|e| attach(e, file))?;
    render_nodes(&nodes, ctx, &Locals::default(), file)
}

fn render_nodes(nodes: &[Node], ctx: &EvalContext, locals: &Locals, file: Option<&Path>) -> Result<String, Error> {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Expr { source, position } => {
                if source.trim().is_empty() {
                    return Err(attach(
                        Error::new(Reason::EvalError {
                            expression: String::new(),
                            message: "empty expression".to_string(),
                        })
                        .at_position(*position),
                        file,
                    ));
                }
                let rendered = eval_stringified(ctx, locals, source)
                    .map_err(|e| attach(e.at_position(*position), file))?;
                out.push_str(&rendered);
            }
            Node::For { var_name, iter_source, body, position } => {
                let iter_expr = parse_expr(iter_source).map_err(|e| attach(e.at_position(*position), file))?;
                let iterable = eval(ctx, locals, &iter_expr).map_err(|e| attach(e.at_position(*position), file))?;
                let items = as_iterable(&iterable).map_err(|e| attach(e.at_position(*position), file))?;
                for item in items {
                    let child_locals = locals.with_binding(var_name, item);
                    out.push_str(&render_nodes(body, ctx, &child_locals, file)?);
                }
            }
            Node::If { branches, or_else, position } => {
                let mut rendered = false;
                for branch in branches {
                    let cond_expr =
                        parse_expr(&branch.condition_source).map_err(|e| attach(e.at_position(*position), file))?;
                    let value = eval(ctx, locals, &cond_expr).map_err(|e| attach(e.at_position(*position), file))?;
                    if value.is_truthy() {
                        out.push_str(&render_nodes(&branch.body, ctx, locals, file)?);
                        rendered = true;
                        break;
                    }
                }
                if !rendered {
                    if let Some(else_body) = or_else {
                        out.push_str(&render_nodes(else_body, ctx, locals, file)?);
                    }
                }
            }
        }
    }
    Ok(out)
}

fn attach(error: Error, file: Option<&Path>) -> Error {
    match file {
        Some(path) if error.file.is_none() => Error { file: Some(path.to_path_buf()), ..error },
        _ => error,
    }
}

trait AtPosition {
    fn at_position(self, position: Position) -> Self;
}

impl AtPosition for Error {
    fn at_position(self, position: Position) -> Error {
        Error { position: Some(position), ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx<'a>(
        globals: &'a BTreeMap<String, crate::runtime::value::Value>,
        refs: &'a BTreeMap<String, crate::model::QualifiedName>,
    ) -> EvalContext<'a> {
        EvalContext { globals, resolved_refs: refs, target_schema: "analytics" }
    }

    #[test]
    fn identity_on_pure_text() {
        let globals = BTreeMap::new();
        let refs = BTreeMap::new();
        let c = ctx(&globals, &refs);
        let out = render("SELECT * FROM analytics.users", &c, None).unwrap();
        assert_eq!(out, "SELECT * FROM analytics.users");
    }

    #[test]
    fn simple_projection_scenario() {
        use crate::runtime::value::{Namespace, Record, Value};
        let mut globals = BTreeMap::new();
        globals.insert(
            "target".to_string(),
            Value::Record(std::rc::Rc::new(Record::new([("schema", "analytics".to_string())]))),
        );
        let refs = BTreeMap::new();
        let c = ctx(&globals, &refs);
        let out = render("SELECT * FROM {{ target.schema }}.users", &c, None).unwrap();
        assert_eq!(out, "SELECT * FROM analytics.users");
        let _ = Namespace { name: "unused".to_string(), exports: Default::default() };
    }

    #[test]
    fn loop_scenario_concatenates_stringifications() {
        let globals = BTreeMap::new();
        let refs = BTreeMap::new();
        let c = ctx(&globals, &refs);
        let out = render("{* for x in [1,2,3] *}{{ x }}{* endfor *}", &c, None).unwrap();
        assert_eq!(out, "123");
    }

    #[test]
    fn if_elif_else_scenario() {
        use crate::runtime::value::Value;
        let mut globals = BTreeMap::new();
        globals.insert("env".to_string(), Value::Str("dev".to_string()));
        let refs = BTreeMap::new();
        let c = ctx(&globals, &refs);
        let out = render(
            "{* if env == 'prod' *}P{* elif env == 'dev' *}D{* else *}O{* endif *}",
            &c,
            None,
        )
        .unwrap();
        assert_eq!(out, "D");
    }

    #[test]
    fn nested_blocks_scenario() {
        let globals = BTreeMap::new();
        let refs = BTreeMap::new();
        let c = ctx(&globals, &refs);
        let out = render("{* for x in [1,2,3] *}{* if x > 1 *}{{ x }}{* endif *}{* endfor *}", &c, None).unwrap();
        assert_eq!(out, "23");
    }

    #[test]
    fn macro_call_scenario() {
        use crate::runtime::value::{FunctionDef, Namespace, Value};
        let mut exports = BTreeMap::new();
        exports.insert(
            "upper".to_string(),
            Value::Function(std::rc::Rc::new(FunctionDef {
                name: "upper".to_string(),
                params: vec!["c".to_string()],
                body: crate::runtime::macro_lang::parse_module(
                    "def upper(c):\n    return \"UPPER(\" + c + \")\"\n",
                )
                .unwrap()
                .into_iter()
                .find_map(|s| match s {
                    crate::runtime::ast::Stmt::FunctionDef { body, .. } => Some(body),
                    _ => None,
                })
                .unwrap(),
            })),
        );
        let mut globals = BTreeMap::new();
        globals.insert(
            "utils".to_string(),
            Value::Namespace(std::rc::Rc::new(Namespace { name: "utils".to_string(), exports })),
        );
        let refs = BTreeMap::new();
        let c = ctx(&globals, &refs);
        let out = render("{{ utils.upper('x') }}", &c, None).unwrap();
        assert_eq!(out, "UPPER(x)");
    }

    #[test]
    fn empty_expression_raises_eval_error() {
        let globals = BTreeMap::new();
        let refs = BTreeMap::new();
        let c = ctx(&globals, &refs);
        let err = render("{{ }}", &c, None).unwrap_err();
        assert!(matches!(err.reason, Reason::EvalError { .. }));
    }

    #[test]
    fn empty_iteration_produces_empty_output() {
        let globals = BTreeMap::new();
        let refs = BTreeMap::new();
        let c = ctx(&globals, &refs);
        let out = render("{* for x in [] *}{{ x }}{* endfor *}", &c, None).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn non_iterable_for_target_raises_cannot_iterate() {
        use crate::runtime::value::Value;
        let mut globals = BTreeMap::new();
        globals.insert("n".to_string(), Value::Int(1));
        let refs = BTreeMap::new();
        let c = ctx(&globals, &refs);
        let err = render("{* for x in n *}{{ x }}{* endfor *}", &c, None).unwrap_err();
        assert!(matches!(err.reason, Reason::CannotIterate { .. }));
    }
}
