//! Evaluator for the embedded expression runtime. Two entry
//! points: expression mode ([`eval`]) and stringified expression mode
//! ([`eval_stringified`]).

use std::collections::BTreeMap;

use crate::error::{Error, Reason};
use crate::model::QualifiedName;
use crate::runtime::ast::{BinOp, Expr, Stmt, UnaryOp};
use crate::runtime::value::{FunctionDef, Value};

/// No file I/O, no network — the sandbox simply never exposes functions
/// that would do either. Recursion is bounded so a pathological macro can't
/// blow the native stack.
const MAX_CALL_DEPTH: usize = 200;

pub struct EvalContext<'a> {
    pub globals: &'a BTreeMap<String, Value>,
    pub resolved_refs: &'a BTreeMap<String, QualifiedName>,
    pub target_schema: &'a str,
}

/// A stack of local binding frames (innermost last); `for`-loop bodies and
/// function calls each push one. Locals shadow globals on lookup.
#[derive(Clone, Default)]
pub struct Locals(pub Vec<BTreeMap<String, Value>>);

impl Locals {
    pub fn get(&self, name: &str) -> Option<Value> {
        for frame in self.0.iter().rev() {
            if let Some(v) = frame.get(name) {
                return Some(v.clone());
            }
        }
        None
    }

    /// A new copy of `self` with one more binding pushed — the "copy
    /// semantics" required of `for`-loop bodies: mutations made
    /// while rendering the body must not leak back to the parent scope.
    pub fn with_binding(&self, name: &str, value: Value) -> Locals {
        let mut frames = self.0.clone();
        let mut frame = BTreeMap::new();
        frame.insert(name.to_string(), value);
        frames.push(frame);
        Locals(frames)
    }
}

pub fn eval(ctx: &EvalContext, locals: &Locals, expr: &Expr) -> Result<Value, Error> {
    eval_depth(ctx, locals, expr, 0)
}

/// Stringified expression mode: evaluate, then render per the
/// stringification rules in [`Value::stringify`].
pub fn eval_stringified(ctx: &EvalContext, locals: &Locals, source: &str) -> Result<String, Error> {
    let expr = crate::runtime::expr_parser::parse_expr(source).map_err(|e| {
        wrap_eval_error(source, e)
    })?;
    let value = eval(ctx, locals, &expr).map_err(|e| wrap_eval_error(source, e))?;
    Ok(value.stringify())
}

fn wrap_eval_error(source: &str, e: Error) -> Error {
    match &e.reason {
        Reason::EvalError { .. } => e,
        Reason::ParseError { message } => Error::new(Reason::EvalError {
            expression: source.to_string(),
            message: message.clone(),
        }),
        _ => e,
    }
}

fn eval_depth(ctx: &EvalContext, locals: &Locals, expr: &Expr, depth: usize) -> Result<Value, Error> {
    if depth > MAX_CALL_DEPTH {
        return Err(eval_err(expr_source(expr), "recursion limit exceeded"));
    }
    match expr {
        Expr::None => Ok(Value::None),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Name(name) => lookup(ctx, locals, name),
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|e| eval_depth(ctx, locals, e, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(values))
        }
        Expr::Dict(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                let kv = eval_depth(ctx, locals, k, depth + 1)?;
                let vv = eval_depth(ctx, locals, v, depth + 1)?;
                out.push((kv, vv));
            }
            Ok(Value::Dict(out))
        }
        Expr::Attr(base, name) => {
            let base_val = eval_depth(ctx, locals, base, depth + 1)?;
            attr_access(&base_val, name)
        }
        Expr::Index(base, index) => {
            let base_val = eval_depth(ctx, locals, base, depth + 1)?;
            let index_val = eval_depth(ctx, locals, index, depth + 1)?;
            index_access(&base_val, &index_val)
        }
        Expr::Call(callee, args) => {
            let arg_values = args
                .iter()
                .map(|a| eval_depth(ctx, locals, a, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            call(ctx, locals, callee, &arg_values, depth)
        }
        Expr::Unary(op, inner) => {
            let v = eval_depth(ctx, locals, inner, depth + 1)?;
            unary(*op, v)
        }
        Expr::Binary(op, l, r) => {
            // `and`/`or` short-circuit; everything else evaluates both sides.
            match op {
                BinOp::And => {
                    let lv = eval_depth(ctx, locals, l, depth + 1)?;
                    if !lv.is_truthy() {
                        Ok(lv)
                    } else {
                        eval_depth(ctx, locals, r, depth + 1)
                    }
                }
                BinOp::Or => {
                    let lv = eval_depth(ctx, locals, l, depth + 1)?;
                    if lv.is_truthy() {
                        Ok(lv)
                    } else {
                        eval_depth(ctx, locals, r, depth + 1)
                    }
                }
                _ => {
                    let lv = eval_depth(ctx, locals, l, depth + 1)?;
                    let rv = eval_depth(ctx, locals, r, depth + 1)?;
                    binary(*op, lv, rv)
                }
            }
        }
        Expr::IfElse(cond, body, or_else) => {
            let c = eval_depth(ctx, locals, cond, depth + 1)?;
            if c.is_truthy() {
                eval_depth(ctx, locals, body, depth + 1)
            } else {
                eval_depth(ctx, locals, or_else, depth + 1)
            }
        }
    }
}

fn lookup(ctx: &EvalContext, locals: &Locals, name: &str) -> Result<Value, Error> {
    if let Some(v) = locals.get(name) {
        return Ok(v);
    }
    if let Some(v) = ctx.globals.get(name) {
        return Ok(v.clone());
    }
    Err(eval_err(name, &format!("name `{name}` is not defined")))
}

fn attr_access(base: &Value, name: &str) -> Result<Value, Error> {
    match base {
        Value::Record(r) => r.get(name).ok_or_else(|| {
            eval_err(name, &format!("record has no attribute `{name}`"))
        }),
        Value::Namespace(ns) => ns.exports.get(name).cloned().ok_or_else(|| {
            eval_err(name, &format!("namespace `{}` has no attribute `{name}`", ns.name))
        }),
        other => Err(eval_err(
            name,
            &format!("value of type `{}` has no attribute `{name}`", other.type_name()),
        )),
    }
}

fn index_access(base: &Value, index: &Value) -> Result<Value, Error> {
    match (base, index) {
        (Value::List(items), Value::Int(i)) => {
            let idx = normalize_index(*i, items.len())?;
            Ok(items[idx].clone())
        }
        (Value::Dict(pairs), key) => pairs
            .iter()
            .find(|(k, _)| values_equal(k, key))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| eval_err("", &format!("key {} not found", key.repr()))),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(*i, chars.len())?;
            Ok(Value::Str(chars[idx].to_string()))
        }
        (other, _) => Err(eval_err("", &format!("value of type `{}` is not subscriptable", other.type_name()))),
    }
}

fn normalize_index(i: i64, len: usize) -> Result<usize, Error> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx as usize >= len {
        return Err(eval_err("", "index out of range"));
    }
    Ok(idx as usize)
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter().any(|(k2, v2)| values_equal(k, k2) && values_equal(v, v2))
                })
        }
        _ => false,
    }
}

fn unary(op: UnaryOp, v: Value) -> Result<Value, Error> {
    match (op, &v) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, other) => Err(eval_err("", &format!("bad operand for unary -: `{}`", other.type_name()))),
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, Error> {
    use BinOp::*;
    match op {
        Eq => Ok(Value::Bool(values_equal(&l, &r))),
        NotEq => Ok(Value::Bool(!values_equal(&l, &r))),
        In => Ok(Value::Bool(contains(&r, &l)?)),
        NotIn => Ok(Value::Bool(!contains(&r, &l)?)),
        Lt | LtEq | Gt | GtEq => compare(op, &l, &r),
        Add | Sub | Mul | Div | FloorDiv | Mod => arithmetic(op, l, r),
        And | Or => unreachable!("short-circuited above"),
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, Error> {
    match container {
        Value::List(items) => Ok(items.iter().any(|v| values_equal(v, needle))),
        Value::Str(s) => match needle {
            Value::Str(n) => Ok(s.contains(n.as_str())),
            _ => Err(eval_err("", "`in` on a string requires a string operand")),
        },
        Value::Dict(pairs) => Ok(pairs.iter().any(|(k, _)| values_equal(k, needle))),
        other => Err(eval_err("", &format!("value of type `{}` does not support `in`", other.type_name()))),
    }
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Result<Value, Error> {
    let ordering = match (l, r) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => {
            return Err(eval_err(
                "",
                &format!("unorderable types: `{}` and `{}`", l.type_name(), r.type_name()),
            ))
        }
    };
    let ordering = ordering.ok_or_else(|| eval_err("", "unorderable values (NaN)"))?;
    use std::cmp::Ordering::*;
    let result = match op {
        BinOp::Lt => ordering == Less,
        BinOp::LtEq => ordering != Greater,
        BinOp::Gt => ordering == Greater,
        BinOp::GtEq => ordering != Less,
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: BinOp, l: Value, r: Value) -> Result<Value, Error> {
    if let (Value::Str(a), Value::Str(b)) = (&l, &r) {
        if op == BinOp::Add {
            return Ok(Value::Str(format!("{a}{b}")));
        }
    }
    if let (Value::List(a), Value::List(b)) = (&l, &r) {
        if op == BinOp::Add {
            let mut out = a.clone();
            out.extend(b.clone());
            return Ok(Value::List(out));
        }
    }
    let (fa, fb) = match (as_number(&l), as_number(&r)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(eval_err(
                "",
                &format!(
                    "unsupported operand types for arithmetic: `{}` and `{}`",
                    l.type_name(),
                    r.type_name()
                ),
            ))
        }
    };
    let both_int = matches!(l, Value::Int(_)) && matches!(r, Value::Int(_));
    let result = match op {
        BinOp::Add => fa + fb,
        BinOp::Sub => fa - fb,
        BinOp::Mul => fa * fb,
        BinOp::Div => {
            if fb == 0.0 {
                return Err(eval_err("", "division by zero"));
            }
            fa / fb
        }
        BinOp::FloorDiv => {
            if fb == 0.0 {
                return Err(eval_err("", "division by zero"));
            }
            (fa / fb).floor()
        }
        BinOp::Mod => {
            if fb == 0.0 {
                return Err(eval_err("", "division by zero"));
            }
            fa.rem_euclid(fb)
        }
        _ => unreachable!(),
    };
    if both_int && op != BinOp::Div {
        Ok(Value::Int(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Anything iterable: sequences, and dict iteration over keys.
pub fn as_iterable(v: &Value) -> Result<Vec<Value>, Error> {
    match v {
        Value::List(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Dict(pairs) => Ok(pairs.iter().map(|(k, _)| k.clone()).collect()),
        other => Err(Error::new(Reason::CannotIterate {
            type_name: other.type_name().to_string(),
        })),
    }
}

fn call(
    ctx: &EvalContext,
    locals: &Locals,
    callee: &Expr,
    args: &[Value],
    depth: usize,
) -> Result<Value, Error> {
    // `ref(...)` is recognized by name, a dispatch-by-name convention for
    // injected builtins rather than a closure type.
    if let Expr::Name(name) = callee {
        if name == "ref" {
            return call_ref(ctx, args);
        }
    }

    let callee_val = eval_depth(ctx, locals, callee, depth + 1)?;
    match callee_val {
        Value::Native(name) if name == "ref" => call_ref(ctx, args),
        Value::Function(f) => call_function(ctx, &f, args, depth),
        other => Err(eval_err("", &format!("value of type `{}` is not callable", other.type_name()))),
    }
}

fn call_ref(ctx: &EvalContext, args: &[Value]) -> Result<Value, Error> {
    if args.len() != 1 {
        return Err(eval_err("ref", "ref() takes exactly one argument"));
    }
    let name = match &args[0] {
        Value::Str(s) => s,
        other => {
            return Err(eval_err(
                "ref",
                &format!("ref() argument must be a string, found `{}`", other.type_name()),
            ))
        }
    };
    match ctx.resolved_refs.get(name) {
        Some(qn) => Ok(Value::Str(format!("{}.{}", ctx.target_schema, qn.name))),
        None => Err(eval_err(
            "ref",
            &format!("ref(\"{name}\") does not match a statically-harvested reference; computed ref() arguments are not supported"),
        )),
    }
}

fn call_function(ctx: &EvalContext, f: &FunctionDef, args: &[Value], depth: usize) -> Result<Value, Error> {
    if depth + 1 > MAX_CALL_DEPTH {
        return Err(eval_err(&f.name, "recursion limit exceeded"));
    }
    if args.len() != f.params.len() {
        return Err(eval_err(
            &f.name,
            &format!("{}() takes {} argument(s), got {}", f.name, f.params.len(), args.len()),
        ));
    }
    let mut frame = BTreeMap::new();
    for (param, arg) in f.params.iter().zip(args) {
        frame.insert(param.clone(), arg.clone());
    }
    let call_locals = Locals(vec![frame]);

    match exec_block(ctx, &call_locals, &f.body, depth + 1)? {
        Flow::Return(v) => Ok(v),
        Flow::Normal => Ok(Value::None),
    }
}

/// Control-flow signal threaded through statement execution (macro bodies).
pub enum Flow {
    Normal,
    Return(Value),
}

pub fn exec_block(ctx: &EvalContext, locals: &Locals, stmts: &[Stmt], depth: usize) -> Result<Flow, Error> {
    let mut locals = locals.clone();
    for stmt in stmts {
        match exec_stmt(ctx, &mut locals, stmt, depth)? {
            Flow::Normal => {}
            ret @ Flow::Return(_) => return Ok(ret),
        }
    }
    Ok(Flow::Normal)
}

/// Executes a macro file's top-level statements with no project globals
/// exposed, then returns the resulting top-level bindings — the module's
/// exports before the `_`-prefix filter is applied.
pub fn exec_module(stmts: &[Stmt]) -> Result<BTreeMap<String, Value>, Error> {
    let empty_globals = BTreeMap::new();
    let empty_refs = BTreeMap::new();
    let ctx = EvalContext {
        globals: &empty_globals,
        resolved_refs: &empty_refs,
        target_schema: "",
    };
    let mut locals = Locals(vec![BTreeMap::new()]);
    for stmt in stmts {
        exec_stmt(&ctx, &mut locals, stmt, 0)?;
    }
    Ok(locals.0.into_iter().next().unwrap_or_default())
}

fn exec_stmt(ctx: &EvalContext, locals: &mut Locals, stmt: &Stmt, depth: usize) -> Result<Flow, Error> {
    match stmt {
        Stmt::Assign(name, expr) => {
            let value = eval_depth(ctx, locals, expr, depth)?;
            locals
                .0
                .last_mut()
                .expect("exec_block always has at least one frame")
                .insert(name.clone(), value);
            Ok(Flow::Normal)
        }
        Stmt::ExprStmt(expr) => {
            eval_depth(ctx, locals, expr, depth)?;
            Ok(Flow::Normal)
        }
        Stmt::Return(expr) => {
            let value = match expr {
                Some(e) => eval_depth(ctx, locals, e, depth)?,
                None => Value::None,
            };
            Ok(Flow::Return(value))
        }
        Stmt::If { branches, or_else } => {
            for (cond, body) in branches {
                if eval_depth(ctx, locals, cond, depth)?.is_truthy() {
                    return exec_block(ctx, locals, body, depth + 1);
                }
            }
            if let Some(body) = or_else {
                return exec_block(ctx, locals, body, depth + 1);
            }
            Ok(Flow::Normal)
        }
        Stmt::For { var_name, iter, body } => {
            let iterable = eval_depth(ctx, locals, iter, depth)?;
            for item in as_iterable(&iterable)? {
                let child_locals = locals.with_binding(var_name, item);
                match exec_block(ctx, &child_locals, body, depth + 1)? {
                    Flow::Normal => {}
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            }
            Ok(Flow::Normal)
        }
        Stmt::FunctionDef { name, params, body } => {
            let f = Value::Function(std::rc::Rc::new(FunctionDef {
                name: name.clone(),
                params: params.clone(),
                body: body.clone(),
            }));
            locals
                .0
                .last_mut()
                .expect("exec_block always has at least one frame")
                .insert(name.clone(), f);
            Ok(Flow::Normal)
        }
    }
}

fn eval_err(expression: &str, message: &str) -> Error {
    Error::new(Reason::EvalError {
        expression: expression.to_string(),
        message: message.to_string(),
    })
}

fn expr_source(_expr: &Expr) -> &'static str {
    "<expr>"
}
