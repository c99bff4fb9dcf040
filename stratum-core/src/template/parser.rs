//! Template parser: recursive-descent over the token stream,
//! recognizing `for`/`endfor` and `if`/`elif`/`else`/`endif` statement
//! forms by regex and composing the block [`Node`] tree.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Position, Reason};
use crate::template::ast::{Branch, Node};
use crate::template::lexer::{tokenize, Tok, TokKind};

static FOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^for\s+(\w+)\s+in\s+(.+?)\s*:?\s*$").unwrap());
static IF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^if\s+(.+?)\s*:?\s*$").unwrap());
static ELIF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^elif\s+(.+?)\s*:?\s*$").unwrap());
static ELSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^else\s*:?\s*$").unwrap());
static ENDFOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^endfor\s*:?\s*$").unwrap());
static ENDIF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^endif\s*:?\s*$").unwrap());

pub fn parse(source: &str) -> Result<Vec<Node>, Error> {
    let toks = tokenize(source)?;
    let mut p = Parser { toks, pos: 0 };
    let nodes = p.parse_nodes(&[])?;
    if p.peek().kind != TokKind::Eof {
        return Err(unmatched_at(p.peek(), stmt_kind(&p.peek().value)));
    }
    Ok(nodes)
}

/// The statement forms that end a block: used to know when to stop
/// collecting a body without consuming the terminator (the caller inspects
/// it to decide which branch/block it closes).
type Terminators<'a> = &'a [&'a str];

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos]
    }

    fn bump(&mut self) -> Tok {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn parse_nodes(&mut self, terminators: Terminators) -> Result<Vec<Node>, Error> {
        let mut nodes = Vec::new();
        loop {
            match self.peek().kind {
                TokKind::Eof => break,
                TokKind::Text => {
                    let t = self.bump();
                    nodes.push(Node::Text(t.value));
                }
                TokKind::Expr => {
                    let t = self.bump();
                    nodes.push(Node::Expr { source: t.value, position: t.position });
                }
                TokKind::Stmt => {
                    let text = self.peek().value.clone();
                    if terminators.iter().any(|t| stmt_matches(t, &text)) {
                        break;
                    }
                    if FOR_RE.is_match(&text) {
                        nodes.push(self.parse_for()?);
                    } else if IF_RE.is_match(&text) {
                        nodes.push(self.parse_if()?);
                    } else if ENDFOR_RE.is_match(&text) || ENDIF_RE.is_match(&text) || ELIF_RE.is_match(&text) || ELSE_RE.is_match(&text) {
                        let pos = self.peek().position;
                        return Err(unmatched_at_pos(pos, stmt_kind(&text)));
                    } else {
                        let pos = self.peek().position;
                        return Err(Error::new(Reason::ParseError {
                            message: format!("invalid statement `{text}`"),
                        })
                        .at_position(pos));
                    }
                }
            }
        }
        Ok(nodes)
    }

    fn parse_for(&mut self) -> Result<Node, Error> {
        let open = self.bump();
        let caps = FOR_RE.captures(&open.value).expect("caller checked FOR_RE");
        let var_name = caps[1].to_string();
        let iter_source = caps[2].to_string();

        let body = self.parse_nodes(&["endfor"])?;

        if self.peek().kind != TokKind::Stmt || !ENDFOR_RE.is_match(&self.peek().value) {
            return Err(Error::new(Reason::UnmatchedBlock { kind: "for" }).at_position(open.position));
        }
        self.bump();

        Ok(Node::For { var_name, iter_source, body, position: open.position })
    }

    fn parse_if(&mut self) -> Result<Node, Error> {
        let open = self.bump();
        let caps = IF_RE.captures(&open.value).expect("caller checked IF_RE");
        let mut branches = vec![Branch {
            condition_source: caps[1].to_string(),
            body: self.parse_nodes(&["elif", "else", "endif"])?,
        }];

        let mut or_else = None;
        loop {
            if self.peek().kind != TokKind::Stmt {
                return Err(Error::new(Reason::UnmatchedBlock { kind: "if" }).at_position(open.position));
            }
            let text = self.peek().value.clone();
            if let Some(caps) = ELIF_RE.captures(&text) {
                self.bump();
                branches.push(Branch {
                    condition_source: caps[1].to_string(),
                    body: self.parse_nodes(&["elif", "else", "endif"])?,
                });
                continue;
            }
            if ELSE_RE.is_match(&text) {
                self.bump();
                or_else = Some(self.parse_nodes(&["endif"])?);
                if self.peek().kind != TokKind::Stmt || !ENDIF_RE.is_match(&self.peek().value) {
                    return Err(Error::new(Reason::UnmatchedBlock { kind: "if" }).at_position(open.position));
                }
                self.bump();
                break;
            }
            if ENDIF_RE.is_match(&text) {
                self.bump();
                break;
            }
            return Err(Error::new(Reason::UnmatchedBlock { kind: "if" }).at_position(open.position));
        }

        Ok(Node::If { branches, or_else, position: open.position })
    }
}

fn stmt_matches(terminator: &str, text: &str) -> bool {
    match terminator {
        "endfor" => ENDFOR_RE.is_match(text),
        "endif" => ENDIF_RE.is_match(text),
        "elif" => ELIF_RE.is_match(text),
        "else" => ELSE_RE.is_match(text),
        _ => false,
    }
}

fn stmt_kind(text: &str) -> &'static str {
    if ENDFOR_RE.is_match(text) {
        "endfor"
    } else if ENDIF_RE.is_match(text) {
        "endif"
    } else if ELIF_RE.is_match(text) {
        "elif"
    } else if ELSE_RE.is_match(text) {
        "else"
    } else {
        "statement"
    }
}

fn unmatched_at(tok: &Tok, kind: &'static str) -> Error {
    Error::new(Reason::UnmatchedBlock { kind }).at_position(tok.position)
}

fn unmatched_at_pos(position: Position, kind: &'static str) -> Error {
    Error::new(Reason::UnmatchedBlock { kind }).at_position(position)
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

    #[test]
    fn parses_plain_text() {
        let nodes = parse("SELECT 1").unwrap();
        assert_eq!(nodes, vec![Node::Text("SELECT 1".to_string())]);
    }

    #[test]
    fn parses_for_endfor() {
        let nodes = parse("{* for x in xs *}{{ x }}{* endfor *}").unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(matches!(&nodes[0], Node::For { var_name, .. } if var_name == "x"));
    }

    #[test]
    fn parses_if_elif_else_endif() {
        let nodes = parse(
            "{* if env == 'prod' *}P{* elif env == 'dev' *}D{* else *}O{* endif *}",
        )
        .unwrap();
        match &nodes[0] {
            Node::If { branches, or_else, .. } => {
                assert_eq!(branches.len(), 2);
                assert!(or_else.is_some());
            }
            other => panic!("expected if node, got {other:?}"),
        }
    }

    #[test]
    fn missing_endfor_is_unmatched_block() {
        let err = parse("{* for x in xs *}{{ x }}").unwrap_err();
        assert!(matches!(err.reason, Reason::UnmatchedBlock { kind: "for" }));
    }

    #[test]
    fn missing_endif_is_unmatched_block() {
        let err = parse("{* if x *}{{ x }}").unwrap_err();
        assert!(matches!(err.reason, Reason::UnmatchedBlock { kind: "if" }));
    }

    #[test]
    fn stray_endfor_is_unmatched_block() {
        let err = parse("{* endfor *}").unwrap_err();
        assert!(matches!(err.reason, Reason::UnmatchedBlock { kind: "endfor" }));
    }

    #[test]
    fn invalid_statement_is_a_parse_error() {
        let err = parse("{* frobnicate *}").unwrap_err();
        assert!(matches!(err.reason, Reason::ParseError { .. }));
    }

    #[test]
    fn nested_for_and_if() {
        let nodes = parse("{* for x in xs *}{* if x *}{{ x }}{* endif *}{* endfor *}").unwrap();
        match &nodes[0] {
            Node::For { body, .. } => {
                assert_eq!(body.len(), 1);
                assert!(matches!(body[0], Node::If { .. }));
            }
            other => panic!("expected for node, got {other:?}"),
        }
    }

    #[test]
    fn trailing_colon_is_optional() {
        let a = parse("{* for x in xs: *}{{ x }}{* endfor *}").unwrap();
        let b = parse("{* for x in xs *}{{ x }}{* endfor *}").unwrap();
        assert_eq!(a, b);
    }
}
