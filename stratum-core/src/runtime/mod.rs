//! The embedded expression runtime: a small, sandboxed Python-flavored
//! language used for both template expressions (`{{ ... }}`, `{* for/if *}`)
//! and macro-file bodies.

pub mod ast;
pub mod eval;
pub mod expr_parser;
pub mod globals;
pub mod lexer;
pub mod macro_lang;
pub mod pool;
pub mod value;

pub use eval::{eval, eval_stringified, EvalContext, Locals};
pub use globals::{base_globals, for_model, RunParams, Target};
pub use pool::{Evaluator, Pool, PooledEvaluator, DEFAULT_POOL_SIZE};
pub use value::{FunctionDef, Namespace, Pairs, Record, Value};
