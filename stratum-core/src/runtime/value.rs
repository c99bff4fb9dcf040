//! The value domain of the embedded expression runtime:
//! `{Nil, Bool, Int, Float, String, Sequence, Mapping, Callable, Opaque}`.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::runtime::ast::Stmt;

/// A dict entry list rather than a hash map: values need not be hashable
/// (spec: "hashable containers only where hashing is required", and keys
/// here are almost always strings or small integers compared by equality,
/// not hashed).
pub type Pairs = Vec<(Value, Value)>;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(Pairs),
    /// An attribute-accessible, read-only record: `target`, `this`.
    Record(Rc<Record>),
    /// A frozen macro namespace, exposed as `namespace.export`.
    Namespace(Rc<Namespace>),
    /// A macro-defined function, interpreted on call.
    Function(Rc<FunctionDef>),
    /// An engine-provided function such as `ref`, dispatched by name rather
    /// than interpreted.
    Native(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub fields: BTreeMap<String, Value2Eq>,
}

/// `Value` can't cheaply derive `PartialEq` (functions aren't comparable),
/// but records only ever hold comparable scalars in this engine (`target`,
/// `this`), so they get their own small eq-able value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value2Eq {
    Str(String),
}

impl Record {
    pub fn new(fields: impl IntoIterator<Item = (&'static str, String)>) -> Self {
        Record {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value2Eq::Str(v)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.get(name).map(|v| match v {
            Value2Eq::Str(s) => Value::Str(s.clone()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub exports: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Record(_) => "record",
            Value::Namespace(_) => "namespace",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function",
        }
    }

    /// `False`, `None`, zero numbers, empty strings/sequences/mappings are
    /// falsy, everything else truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Dict(pairs) => !pairs.is_empty(),
            Value::Record(_) | Value::Namespace(_) | Value::Function(_) | Value::Native(_) => true,
        }
    }

    /// Stringified expression mode: strings verbatim, ints/bools
    /// as canonical Python literals, `None` as `None`, sequences/mappings
    /// with bracket/brace syntax.
    pub fn stringify(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            _ => self.repr(),
        }
    }

    /// Canonical `repr`-style rendering, used both for `stringify` of
    /// non-strings and for values nested inside sequences/mappings (where
    /// even strings get quoted, matching Python's `repr`).
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => {
                let inner = items.iter().map(Value::repr).collect::<Vec<_>>().join(", ");
                format!("[{inner}]")
            }
            Value::Dict(pairs) => {
                let inner = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{inner}}}")
            }
            Value::Record(r) => {
                let inner = r
                    .fields
                    .iter()
                    .map(|(k, v)| {
                        let Value2Eq::Str(s) = v;
                        format!("{k}={s}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Record({inner})")
            }
            Value::Namespace(n) => format!("<namespace {}>", n.name),
            Value::Function(f) => format!("<function {}>", f.name),
            Value::Native(name) => format!("<builtin {name}>"),
        }
    }
}

/// No trailing-zero trimming beyond what Rust's default float formatting
/// does; only `3.14`-style round-tripping is pinned, so we adopt the
/// runtime's default formatting rather than a custom stringifier.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_python_rules() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Int(1).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
    }

    #[test]
    fn stringify_strings_verbatim_and_others_canonically() {
        assert_eq!(Value::Str("hi".into()).stringify(), "hi");
        assert_eq!(Value::Bool(true).stringify(), "True");
        assert_eq!(Value::None.stringify(), "None");
        assert_eq!(Value::Int(42).stringify(), "42");
    }

    #[test]
    fn float_round_trips_common_case() {
        assert_eq!(Value::Float(3.14).stringify(), "3.14");
        assert_eq!(Value::Float(2.0).stringify(), "2.0");
    }

    #[test]
    fn list_and_dict_render_with_bracket_brace_syntax() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(list.stringify(), "[1, 2]");

        let dict = Value::Dict(vec![(Value::Str("k".into()), Value::Str("v".into()))]);
        assert_eq!(dict.stringify(), "{'k': 'v'}");
    }
}
