//! Template lexer: splits a model body into `TEXT`, `EXPR`,
//! `STMT`, and a trailing `EOF` token, tracking 1-based line/column
//! positions and brace depth inside `{{ … }}`/`{* … *}` bodies.

use crate::error::{Error, LexErrorKind, Position, Reason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokKind {
    Text,
    Expr,
    Stmt,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tok {
    pub kind: TokKind,
    pub value: String,
    pub position: Position,
}

const EXPR_OPEN: &str = "{{";
const EXPR_CLOSE: &str = "}}";
const STMT_OPEN: &str = "{*";
const STMT_CLOSE: &str = "*}";

pub fn tokenize(src: &str) -> Result<Vec<Tok>, Error> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut line = 1usize;
    let mut column = 1usize;
    let mut toks = Vec::new();

    let mut text_buf = String::new();
    let mut text_start = Position { line, column };

    macro_rules! advance {
        ($n:expr) => {{
            for _ in 0..$n {
                if i < chars.len() {
                    if chars[i] == '\n' {
                        line += 1;
                        column = 1;
                    } else {
                        column += 1;
                    }
                    i += 1;
                }
            }
        }};
    }

    macro_rules! flush_text {
        () => {
            if !text_buf.is_empty() {
                toks.push(Tok { kind: TokKind::Text, value: std::mem::take(&mut text_buf), position: text_start });
            }
        };
    }

    while i < chars.len() {
        if starts_with(&chars, i, EXPR_OPEN) {
            flush_text!();
            let open_pos = Position { line, column };
            advance!(2);
            let (body, found_close) = scan_delimited(&chars, &mut i, &mut line, &mut column, EXPR_CLOSE);
            if !found_close {
                return Err(with_position(
                    Error::new(Reason::LexError { kind: LexErrorKind::UnclosedExpr }),
                    open_pos,
                ));
            }
            toks.push(Tok { kind: TokKind::Expr, value: body.trim().to_string(), position: open_pos });
            text_start = Position { line, column };
            continue;
        }
        if starts_with(&chars, i, STMT_OPEN) {
            flush_text!();
            let open_pos = Position { line, column };
            advance!(2);
            let (body, found_close) = scan_delimited(&chars, &mut i, &mut line, &mut column, STMT_CLOSE);
            if !found_close {
                return Err(with_position(
                    Error::new(Reason::LexError { kind: LexErrorKind::UnclosedStmt }),
                    open_pos,
                ));
            }
            toks.push(Tok { kind: TokKind::Stmt, value: body.trim().to_string(), position: open_pos });
            text_start = Position { line, column };
            continue;
        }

        if text_buf.is_empty() {
            text_start = Position { line, column };
        }
        text_buf.push(chars[i]);
        advance!(1);
    }

    flush_text!();
    toks.push(Tok { kind: TokKind::Eof, value: String::new(), position: Position { line, column } });
    Ok(toks)
}

/// Attaches a position to an error without requiring a file path — the
/// lexer operates on bare template strings; the caller attaches `file` once
/// it knows which model produced the error.
fn with_position(error: Error, position: Position) -> Error {
    Error { position: Some(position), ..error }
}

fn starts_with(chars: &[char], i: usize, needle: &str) -> bool {
    let needle_chars: Vec<char> = needle.chars().collect();
    if i + needle_chars.len() > chars.len() {
        return false;
    }
    chars[i..i + needle_chars.len()] == needle_chars[..]
}

/// Scans forward from `*i` (just past the opening delimiter) until the
/// matching `close` is found at brace-depth 0, tracking `{`/`}` depth so a
/// literal dict/set inside the body doesn't prematurely end the token.
/// Returns the raw body text and whether a close was actually found.
fn scan_delimited(
    chars: &[char],
    i: &mut usize,
    line: &mut usize,
    column: &mut usize,
    close: &str,
) -> (String, bool) {
    let mut depth = 0i32;
    let mut body = String::new();

    while *i < chars.len() {
        if depth == 0 && starts_with(chars, *i, close) {
            for _ in 0..close.chars().count() {
                bump(chars, i, line, column);
            }
            return (body, true);
        }
        let c = chars[*i];
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        body.push(c);
        bump(chars, i, line, column);
    }
    (body, false)
}

fn bump(chars: &[char], i: &mut usize, line: &mut usize, column: &mut usize) {
    if *i < chars.len() {
        if chars[*i] == '\n' {
            *line += 1;
            *column = 1;
        } else {
            *column += 1;
        }
        *i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(toks: &[Tok]) -> Vec<TokKind> {
        toks.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_plain_text_to_a_single_text_token() {
        let toks = tokenize("SELECT 1").unwrap();
        assert_eq!(kinds(&toks), vec![TokKind::Text, TokKind::Eof]);
        assert_eq!(toks[0].value, "SELECT 1");
    }

    #[test]
    fn tokenizes_expr_and_trims_inner_whitespace() {
        let toks = tokenize("{{  1 + 1  }}").unwrap();
        assert_eq!(kinds(&toks), vec![TokKind::Expr, TokKind::Eof]);
        assert_eq!(toks[0].value, "1 + 1");
    }

    #[test]
    fn empty_expr_yields_empty_value_token() {
        let toks = tokenize("{{ }}").unwrap();
        assert_eq!(toks[0].value, "");
    }

    #[test]
    fn dict_literal_inside_expr_does_not_confuse_brace_depth() {
        let toks = tokenize(r#"{{ {"k": "v"} }}"#).unwrap();
        assert_eq!(toks[0].value, r#"{"k": "v"}"#);
    }

    #[test]
    fn tokenizes_stmt_delimiters() {
        let toks = tokenize("{* for x in xs *}").unwrap();
        assert_eq!(kinds(&toks), vec![TokKind::Stmt, TokKind::Eof]);
        assert_eq!(toks[0].value, "for x in xs");
    }

    #[test]
    fn mixes_text_and_blocks() {
        let toks = tokenize("a{{ x }}b{* if y *}c{* endif *}d").unwrap();
        assert_eq!(
            kinds(&toks),
            vec![
                TokKind::Text,
                TokKind::Expr,
                TokKind::Text,
                TokKind::Stmt,
                TokKind::Text,
                TokKind::Stmt,
                TokKind::Text,
                TokKind::Eof,
            ]
        );
    }

    #[test]
    fn unclosed_expr_is_a_lex_error() {
        assert!(tokenize("{{ x").is_err());
    }

    #[test]
    fn unclosed_stmt_is_a_lex_error() {
        assert!(tokenize("{* for x in xs").is_err());
    }

    #[test]
    fn tracks_line_and_column_positions() {
        let toks = tokenize("a\nb{{ x }}").unwrap();
        let expr = toks.iter().find(|t| t.kind == TokKind::Expr).unwrap();
        assert_eq!(expr.position.line, 2);
    }
}
