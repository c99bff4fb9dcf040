//! Reference harvester: a textual, single-pass scan for
//! `ref("name")` / `ref('name')` invocations. Deliberately cheaper than full
//! template evaluation — computed `ref(...)` arguments are not resolvable
//! here and are rejected later, at render time.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

static REF_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"ref\(\s*(?:"([A-Za-z_][A-Za-z0-9_.]*)"|'([A-Za-z_][A-Za-z0-9_.]*)')\s*\)"#)
        .expect("static regex is valid")
});

/// Harvest the deduplicated set of `ref()` targets from a model's raw body.
/// Occurrences inside SQL line comments (`-- ...`), block comments
/// (`/* ... */`) or string literals (`'...'`) are ignored: we first blank
/// those spans out (preserving byte length, so later positional errors still
/// line up) and then match against what's left.
pub fn harvest(body: &str) -> BTreeSet<String> {
    let masked = mask_comments_and_strings(body);
    REF_CALL
        .captures_iter(&masked)
        .map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .expect("alternation always captures group 1 or 2")
                .as_str()
                .to_string()
        })
        .collect()
}

/// Given `bytes[i..]` starting with `ref(`, try to consume a complete
/// `ref("name")` / `ref('name')` call and return the exclusive end offset.
/// Returns `None` if what follows isn't a single quoted argument (e.g. a
/// computed expression), in which case the caller falls back to treating
/// `r` as an ordinary code byte.
fn match_ref_call(bytes: &[u8], i: usize) -> Option<usize> {
    let mut j = i + b"ref(".len();
    while bytes.get(j).is_some_and(u8::is_ascii_whitespace) {
        j += 1;
    }
    let quote = *bytes.get(j)?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    j += 1;
    while *bytes.get(j)? != quote {
        j += 1;
    }
    j += 1;
    while bytes.get(j).is_some_and(u8::is_ascii_whitespace) {
        j += 1;
    }
    if *bytes.get(j)? != b')' {
        return None;
    }
    Some(j + 1)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    SingleQuoted,
    DoubleQuoted,
}

/// Replace every byte that lives inside a comment or string literal with a
/// space, leaving delimiters and code bytes untouched elsewhere. Byte length
/// is preserved so the regex's match offsets still map onto the original
/// source should a caller want to report positions later.
///
/// A `ref("...")`/`ref('...')` call recognized while in [`State::Code`] is
/// copied through verbatim rather than entered as a quoted string: the
/// masking pass would otherwise strip the very quotes `REF_CALL` requires,
/// since it can't distinguish "a string literal" from "the argument of the
/// one call this harvester cares about" by looking at the quote alone.
fn mask_comments_and_strings(body: &str) -> String {
    let bytes = body.as_bytes();
    let mut out = vec![b' '; bytes.len()];
    let mut state = State::Code;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match state {
            State::Code => {
                if bytes[i..].starts_with(b"ref(") {
                    if let Some(end) = match_ref_call(bytes, i) {
                        out[i..end].copy_from_slice(&bytes[i..end]);
                        i = end;
                        continue;
                    }
                }
                if c == b'-' && bytes.get(i + 1) == Some(&b'-') {
                    state = State::LineComment;
                    i += 2;
                    continue;
                }
                if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
                    state = State::BlockComment;
                    out[i] = c;
                    out[i + 1] = bytes[i + 1];
                    i += 2;
                    continue;
                }
                if c == b'\'' {
                    state = State::SingleQuoted;
                    i += 1;
                    continue;
                }
                if c == b'"' {
                    state = State::DoubleQuoted;
                    i += 1;
                    continue;
                }
                out[i] = c;
                i += 1;
            }
            State::LineComment => {
                if c == b'\n' {
                    state = State::Code;
                    out[i] = c;
                }
                i += 1;
            }
            State::BlockComment => {
                if c == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    out[i] = c;
                    out[i + 1] = bytes[i + 1];
                    state = State::Code;
                    i += 2;
                    continue;
                }
                if c == b'\n' {
                    out[i] = c;
                }
                i += 1;
            }
            State::SingleQuoted => {
                if c == b'\'' && bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                    continue;
                }
                if c == b'\'' {
                    state = State::Code;
                }
                if c == b'\n' {
                    out[i] = c;
                }
                i += 1;
            }
            State::DoubleQuoted => {
                if c == b'"' {
                    state = State::Code;
                }
                if c == b'\n' {
                    out[i] = c;
                }
                i += 1;
            }
        }
    }
    String::from_utf8(out).expect("masking never changes UTF-8 char boundaries for ASCII bytes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harvests_double_and_single_quoted_names() {
        let body = r#"select * from {{ ref("orders") }} join {{ ref('customers') }}"#;
        let refs = harvest(body);
        assert!(refs.contains("orders"));
        assert!(refs.contains("customers"));
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn dedupes_repeats() {
        let body = r#"{{ ref("orders") }} {{ ref("orders") }}"#;
        assert_eq!(harvest(body).len(), 1);
    }

    #[test]
    fn ignores_refs_inside_line_comments() {
        let body = "-- select {{ ref(\"ignored\") }}\nselect {{ ref(\"kept\") }}";
        let refs = harvest(body);
        assert!(!refs.contains("ignored"));
        assert!(refs.contains("kept"));
    }

    #[test]
    fn ignores_refs_inside_block_comments() {
        let body = "/* {{ ref(\"ignored\") }} */ select {{ ref(\"kept\") }}";
        let refs = harvest(body);
        assert!(!refs.contains("ignored"));
        assert!(refs.contains("kept"));
    }

    #[test]
    fn ignores_refs_inside_string_literals() {
        let body = "select 'ref(\"ignored\")' , {{ ref(\"kept\") }}";
        let refs = harvest(body);
        assert!(!refs.contains("ignored"));
        assert!(refs.contains("kept"));
    }

    #[test]
    fn qualified_names_with_dots_are_allowed() {
        let body = r#"{{ ref("staging.stg_orders") }}"#;
        assert!(harvest(body).contains("staging.stg_orders"));
    }
}
