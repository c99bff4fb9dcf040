//! Tokenizer for the embedded expression language. Operates on a single
//! expression string (the body of a `{{ ... }}`, a `for`/`if` condition, or
//! one statement line inside a macro file) — there is no significant
//! newline handling here; that lives one level up, in
//! [`crate::runtime::macro_lang`]'s line/indentation scan.

use crate::error::{Error, Reason};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    // keywords
    True,
    False,
    None,
    And,
    Or,
    Not,
    In,
    If,
    Else,
    // punctuation / operators
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Assign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Eof,
}

pub fn tokenize(src: &str) -> Result<Vec<Tok>, Error> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut toks = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            // comment to end of line
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            let mut is_float = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                if chars[i] == '.' {
                    is_float = true;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if is_float {
                let f: f64 = text.parse().map_err(|_| {
                    Error::new(Reason::ParseError {
                        message: format!("invalid number literal `{text}`"),
                    })
                })?;
                toks.push(Tok::Float(f));
            } else {
                let n: i64 = text.parse().map_err(|_| {
                    Error::new(Reason::ParseError {
                        message: format!("invalid number literal `{text}`"),
                    })
                })?;
                toks.push(Tok::Int(n));
            }
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                if i >= chars.len() {
                    return Err(Error::new(Reason::ParseError {
                        message: "unterminated string literal".to_string(),
                    }));
                }
                let ch = chars[i];
                if ch == quote {
                    i += 1;
                    break;
                }
                if ch == '\\' && i + 1 < chars.len() {
                    let escaped = chars[i + 1];
                    s.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        '\\' => '\\',
                        '\'' => '\'',
                        '"' => '"',
                        other => other,
                    });
                    i += 2;
                    continue;
                }
                s.push(ch);
                i += 1;
            }
            toks.push(Tok::Str(s));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            toks.push(match word.as_str() {
                "True" => Tok::True,
                "False" => Tok::False,
                "None" => Tok::None,
                "and" => Tok::And,
                "or" => Tok::Or,
                "not" => Tok::Not,
                "in" => Tok::In,
                "if" => Tok::If,
                "else" => Tok::Else,
                _ => Tok::Ident(word),
            });
            continue;
        }

        macro_rules! two_char {
            ($second:expr, $two:expr, $one:expr) => {{
                if i + 1 < chars.len() && chars[i + 1] == $second {
                    i += 2;
                    toks.push($two);
                } else {
                    i += 1;
                    toks.push($one);
                }
            }};
        }

        match c {
            '+' => {
                i += 1;
                toks.push(Tok::Plus);
            }
            '-' => {
                i += 1;
                toks.push(Tok::Minus);
            }
            '*' => {
                i += 1;
                toks.push(Tok::Star);
            }
            '/' => two_char!('/', Tok::SlashSlash, Tok::Slash),
            '%' => {
                i += 1;
                toks.push(Tok::Percent);
            }
            '=' => two_char!('=', Tok::Eq, Tok::Assign),
            '!' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    i += 2;
                    toks.push(Tok::NotEq);
                } else {
                    return Err(Error::new(Reason::ParseError {
                        message: "unexpected `!`".to_string(),
                    }));
                }
            }
            '<' => two_char!('=', Tok::LtEq, Tok::Lt),
            '>' => two_char!('=', Tok::GtEq, Tok::Gt),
            '(' => {
                i += 1;
                toks.push(Tok::LParen);
            }
            ')' => {
                i += 1;
                toks.push(Tok::RParen);
            }
            '[' => {
                i += 1;
                toks.push(Tok::LBracket);
            }
            ']' => {
                i += 1;
                toks.push(Tok::RBracket);
            }
            '{' => {
                i += 1;
                toks.push(Tok::LBrace);
            }
            '}' => {
                i += 1;
                toks.push(Tok::RBrace);
            }
            ',' => {
                i += 1;
                toks.push(Tok::Comma);
            }
            ':' => {
                i += 1;
                toks.push(Tok::Colon);
            }
            '.' => {
                i += 1;
                toks.push(Tok::Dot);
            }
            other => {
                return Err(Error::new(Reason::ParseError {
                    message: format!("unexpected character `{other}`"),
                }))
            }
        }
    }

    toks.push(Tok::Eof);
    Ok(toks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_literals_and_operators() {
        let toks = tokenize("1 + 2.5 * x == 'a'").unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::Int(1),
                Tok::Plus,
                Tok::Float(2.5),
                Tok::Star,
                Tok::Ident("x".into()),
                Tok::Eq,
                Tok::Str("a".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_brace_literal() {
        let toks = tokenize(r#"{"k": "v"}"#).unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::LBrace,
                Tok::Str("k".into()),
                Tok::Colon,
                Tok::Str("v".into()),
                Tok::RBrace,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(tokenize("'abc").is_err());
    }
}
