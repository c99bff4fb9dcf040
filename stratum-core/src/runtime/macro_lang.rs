//! Parser for `.star` macro files: a small, indentation-scoped
//! statement language sharing its expression grammar with
//! [`crate::runtime::expr_parser`]. Only `def`, `return`, `if`/`elif`/`else`,
//! `for`, and assignment/expression statements are recognized — there is no
//! `class`, `while`, `import`, or exception handling, matching the engine's
//! deliberately small surface.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Reason};
use crate::runtime::ast::Stmt;
use crate::runtime::expr_parser::parse_expr;

static DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*:$").unwrap());
static FOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^for\s+([A-Za-z_][A-Za-z0-9_]*)\s+in\s+(.+):$").unwrap());
static IF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^if\s+(.+):$").unwrap());
static ELIF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^elif\s+(.+):$").unwrap());
static ELSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^else\s*:$").unwrap());
static RETURN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^return(\s+(.+))?$").unwrap());
static ASSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=(?!=)\s*(.+)$").unwrap());

struct Line {
    indent: usize,
    text: String,
}

/// Parses a whole macro file body into its top-level statements (normally
/// just a sequence of `def` blocks, though bare statements are accepted too).
pub fn parse_module(source: &str) -> Result<Vec<Stmt>, Error> {
    let lines = scan_lines(source)?;
    let mut pos = 0;
    let stmts = parse_block(&lines, &mut pos, 0)?;
    if pos != lines.len() {
        return Err(Error::new(Reason::ParseError {
            message: format!("unexpected indentation at line {}", pos + 1),
        }));
    }
    Ok(stmts)
}

/// Strips comments and blank lines, computes each remaining line's
/// indentation in spaces (tabs are rejected — a file mixing tabs and spaces
/// is ambiguous, so we require spaces only, matching the engine's other
/// whitespace-insensitive-but-unambiguous choices).
fn scan_lines(source: &str) -> Result<Vec<Line>, Error> {
    let mut lines = Vec::new();
    for (lineno, raw) in source.lines().enumerate() {
        let without_comment = strip_comment(raw);
        if without_comment.trim().is_empty() {
            continue;
        }
        if without_comment.contains('\t') {
            return Err(Error::new(Reason::ParseError {
                message: format!("line {}: tabs are not allowed for indentation", lineno + 1),
            }));
        }
        let indent = without_comment.len() - without_comment.trim_start().len();
        lines.push(Line {
            indent,
            text: without_comment.trim().to_string(),
        });
    }
    Ok(lines)
}

fn strip_comment(line: &str) -> &str {
    let mut in_str: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if let Some(q) = in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_str = Some(c),
            '#' => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_block(lines: &[Line], pos: &mut usize, indent: usize) -> Result<Vec<Stmt>, Error> {
    let mut stmts = Vec::new();
    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(Error::new(Reason::ParseError {
                message: "unexpected indent".to_string(),
            }));
        }
        stmts.push(parse_stmt(lines, pos, indent)?);
    }
    if stmts.is_empty() {
        return Err(Error::new(Reason::ParseError {
            message: "expected an indented block".to_string(),
        }));
    }
    Ok(stmts)
}

fn parse_stmt(lines: &[Line], pos: &mut usize, indent: usize) -> Result<Stmt, Error> {
    let text = lines[*pos].text.clone();

    if let Some(caps) = DEF_RE.captures(&text) {
        let name = caps[1].to_string();
        let params = split_params(&caps[2]);
        *pos += 1;
        let body = parse_block(lines, pos, indent + body_indent(lines, *pos, indent))?;
        return Ok(Stmt::FunctionDef { name, params, body });
    }

    if let Some(caps) = FOR_RE.captures(&text) {
        let var_name = caps[1].to_string();
        let iter = parse_expr(&caps[2])?;
        *pos += 1;
        let body = parse_block(lines, pos, indent + body_indent(lines, *pos, indent))?;
        return Ok(Stmt::For { var_name, iter, body });
    }

    if let Some(caps) = IF_RE.captures(&text) {
        let mut branches = Vec::new();
        let cond = parse_expr(&caps[1])?;
        *pos += 1;
        let body = parse_block(lines, pos, indent + body_indent(lines, *pos, indent))?;
        branches.push((cond, body));

        let mut or_else = None;
        loop {
            if *pos >= lines.len() || lines[*pos].indent != indent {
                break;
            }
            if let Some(caps) = ELIF_RE.captures(&lines[*pos].text) {
                let cond = parse_expr(&caps[1])?;
                *pos += 1;
                let body = parse_block(lines, pos, indent + body_indent(lines, *pos, indent))?;
                branches.push((cond, body));
                continue;
            }
            if ELSE_RE.is_match(&lines[*pos].text) {
                *pos += 1;
                or_else = Some(parse_block(lines, pos, indent + body_indent(lines, *pos, indent))?);
                break;
            }
            break;
        }
        return Ok(Stmt::If { branches, or_else });
    }

    if let Some(caps) = RETURN_RE.captures(&text) {
        let expr = match caps.get(2) {
            Some(m) => Some(parse_expr(m.as_str())?),
            None => None,
        };
        *pos += 1;
        return Ok(Stmt::Return(expr));
    }

    if let Some(caps) = ASSIGN_RE.captures(&text) {
        let name = caps[1].to_string();
        let expr = parse_expr(&caps[2])?;
        *pos += 1;
        return Ok(Stmt::Assign(name, expr));
    }

    let expr = parse_expr(&text)?;
    *pos += 1;
    Ok(Stmt::ExprStmt(expr))
}

/// Indentation of the first line of a block body relative to its header; we
/// require strictly-greater indentation and take whatever the first body
/// line uses as the block's indent width.
fn body_indent(lines: &[Line], pos: usize, header_indent: usize) -> usize {
    lines
        .get(pos)
        .map(|l| l.indent.saturating_sub(header_indent))
        .filter(|delta| *delta > 0)
        .unwrap_or(1)
}

fn split_params(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_function() {
        let src = "def greeting(name):\n    return 'hi ' + name\n";
        let stmts = parse_module(src).unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(matches!(&stmts[0], Stmt::FunctionDef { name, params, .. } if name == "greeting" && params == &["name"]));
    }

    #[test]
    fn parses_if_elif_else() {
        let src = "def f(x):\n    if x > 0:\n        return 1\n    elif x < 0:\n        return -1\n    else:\n        return 0\n";
        let stmts = parse_module(src).unwrap();
        match &stmts[0] {
            Stmt::FunctionDef { body, .. } => match &body[0] {
                Stmt::If { branches, or_else } => {
                    assert_eq!(branches.len(), 2);
                    assert!(or_else.is_some());
                }
                other => panic!("expected if statement, got {other:?}"),
            },
            other => panic!("expected function def, got {other:?}"),
        }
    }

    #[test]
    fn parses_for_loop_and_assignment() {
        let src = "def f(items):\n    total = 0\n    for x in items:\n        total = total + x\n    return total\n";
        let stmts = parse_module(src).unwrap();
        match &stmts[0] {
            Stmt::FunctionDef { body, .. } => {
                assert_eq!(body.len(), 3);
                assert!(matches!(body[0], Stmt::Assign(..)));
                assert!(matches!(body[1], Stmt::For { .. }));
                assert!(matches!(body[2], Stmt::Return(Some(_))));
            }
            other => panic!("expected function def, got {other:?}"),
        }
    }

    #[test]
    fn rejects_tabs() {
        let src = "def f():\n\treturn 1\n";
        assert!(parse_module(src).is_err());
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let src = "# top comment\ndef f():\n\n    return 1  # inline\n";
        let stmts = parse_module(src).unwrap();
        assert_eq!(stmts.len(), 1);
    }
}
