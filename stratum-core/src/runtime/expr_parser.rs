//! Pratt parser turning a token stream into an [`Expr`]. Precedence, low to
//! high: `if/else` (conditional expr) < `or` < `and` < `not` < comparisons
//! (`in`, `==`, `<`, ...) < additive < multiplicative < unary < postfix
//! (call/index/attr) < atom.

use crate::error::{Error, Reason};
use crate::runtime::ast::{BinOp, Expr, UnaryOp};
use crate::runtime::lexer::{tokenize, Tok};

pub fn parse_expr(src: &str) -> Result<Expr, Error> {
    let toks = tokenize(src)?;
    let mut p = Parser { toks, pos: 0 };
    if p.peek() == &Tok::Eof {
        return Err(Error::new(Reason::ParseError {
            message: "empty expression".to_string(),
        }));
    }
    let expr = p.parse_ternary()?;
    p.expect(&Tok::Eof)?;
    Ok(expr)
}

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

    fn expect(&mut self, want: &Tok) -> Result<(), Error> {
        if self.peek() == want {
            self.bump();
            Ok(())
        } else {
            Err(Error::new(Reason::ParseError {
                message: format!("expected {want:?}, found {:?}", self.peek()),
            }))
        }
    }

    fn parse_ternary(&mut self) -> Result<Expr, Error> {
        let body = self.parse_or()?;
        if self.peek() == &Tok::If {
            self.bump();
            let cond = self.parse_or()?;
            self.expect(&Tok::Else)?;
            let or_else = self.parse_ternary()?;
            return Ok(Expr::IfElse(Box::new(cond), Box::new(body), Box::new(or_else)));
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_and()?;
        while self.peek() == &Tok::Or {
            self.bump();
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_not()?;
        while self.peek() == &Tok::And {
            self.bump();
            let right = self.parse_not()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, Error> {
        if self.peek() == &Tok::Not {
            self.bump();
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::Eq => BinOp::Eq,
                Tok::NotEq => BinOp::NotEq,
                Tok::Lt => BinOp::Lt,
                Tok::LtEq => BinOp::LtEq,
                Tok::Gt => BinOp::Gt,
                Tok::GtEq => BinOp::GtEq,
                Tok::In => BinOp::In,
                Tok::Not => {
                    // `not in`
                    let save = self.pos;
                    self.bump();
                    if self.peek() == &Tok::In {
                        self.bump();
                        let right = self.parse_additive()?;
                        left = Expr::Binary(BinOp::NotIn, Box::new(left), Box::new(right));
                        continue;
                    }
                    self.pos = save;
                    break;
                }
                _ => break,
            };
            self.bump();
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::SlashSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        if self.peek() == &Tok::Minus {
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.bump();
                    let name = match self.bump() {
                        Tok::Ident(n) => n,
                        other => {
                            return Err(Error::new(Reason::ParseError {
                                message: format!("expected attribute name, found {other:?}"),
                            }))
                        }
                    };
                    expr = Expr::Attr(Box::new(expr), name);
                }
                Tok::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    if self.peek() != &Tok::RParen {
                        loop {
                            args.push(self.parse_ternary()?);
                            if self.peek() == &Tok::Comma {
                                self.bump();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Tok::RParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                Tok::LBracket => {
                    self.bump();
                    let index = self.parse_ternary()?;
                    self.expect(&Tok::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<Expr, Error> {
        match self.bump() {
            Tok::Int(n) => Ok(Expr::Int(n)),
            Tok::Float(f) => Ok(Expr::Float(f)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::True => Ok(Expr::Bool(true)),
            Tok::False => Ok(Expr::Bool(false)),
            Tok::None => Ok(Expr::None),
            Tok::Ident(name) => Ok(Expr::Name(name)),
            Tok::LParen => {
                let inner = self.parse_ternary()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                if self.peek() != &Tok::RBracket {
                    loop {
                        items.push(self.parse_ternary()?);
                        if self.peek() == &Tok::Comma {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RBracket)?;
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                let mut pairs = Vec::new();
                if self.peek() != &Tok::RBrace {
                    loop {
                        let key = self.parse_ternary()?;
                        self.expect(&Tok::Colon)?;
                        let value = self.parse_ternary()?;
                        pairs.push((key, value));
                        if self.peek() == &Tok::Comma {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RBrace)?;
                Ok(Expr::Dict(pairs))
            }
            other => Err(Error::new(Reason::ParseError {
                message: format!("unexpected token {other:?}"),
            })),
        }
    }
}
