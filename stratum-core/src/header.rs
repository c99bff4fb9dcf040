//! Header scanner: recovers frontmatter from a model file without
//! parsing its SQL body. Intentionally cheap — a byte scan for the `/*---`
//! / `---*/` delimiters, then a YAML parse of the block between them.

use std::collections::BTreeMap;
use std::path::Path;

use serde_yaml::Value as YamlValue;

use crate::error::{Error, Position, Reason, Result};
use crate::model::{Frontmatter, Materialization, TestSpec};

const OPEN: &str = "/*---";
const CLOSE: &str = "---*/";

/// Result of scanning one file: the frontmatter (possibly default) and the
/// raw body remaining after the header, unparsed.
pub struct ScannedHeader {
    pub frontmatter: Frontmatter,
    pub body: String,
}

pub fn scan(path: &Path, source: &str) -> Result<ScannedHeader> {
    let trimmed_start = source.trim_start();
    if !trimmed_start.starts_with(OPEN) {
        return Ok(ScannedHeader {
            frontmatter: Frontmatter::default(),
            body: source.to_string(),
        });
    }

    let leading_ws = source.len() - trimmed_start.len();
    let after_open = &source[leading_ws + OPEN.len()..];
    let close_rel = after_open.find(CLOSE).ok_or_else(|| {
        Error::new(Reason::BadHeader {
            message: "missing closing `---*/` delimiter".to_string(),
        })
        .at(path.to_path_buf(), line_of(source, leading_ws))
    })?;

    let block = &after_open[..close_rel];
    let body_start = leading_ws + OPEN.len() + close_rel + CLOSE.len();
    let body = source[body_start..].to_string();

    let frontmatter = parse_block(path, source, leading_ws, block)?;

    Ok(ScannedHeader { frontmatter, body })
}

fn line_of(source: &str, byte_offset: usize) -> Position {
    let mut line = 1;
    let mut col = 1;
    for ch in source[..byte_offset.min(source.len())].chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    Position { line, column: col }
}

fn parse_block(path: &Path, source: &str, offset: usize, block: &str) -> Result<Frontmatter> {
    if block.trim().is_empty() {
        return Ok(Frontmatter::default());
    }

    let value: YamlValue = serde_yaml::from_str(block).map_err(|e| {
        Error::new(Reason::BadHeader {
            message: format!("invalid YAML: {e}"),
        })
        .at(path.to_path_buf(), line_of(source, offset))
    })?;

    let mapping = value.as_mapping().ok_or_else(|| {
        Error::new(Reason::BadHeader {
            message: "header block must be a mapping".to_string(),
        })
        .at(path.to_path_buf(), line_of(source, offset))
    })?;

    let mut raw = BTreeMap::new();
    for (k, v) in mapping {
        let key = k.as_str().ok_or_else(|| {
            Error::new(Reason::BadHeader {
                message: "header keys must be strings".to_string(),
            })
            .at(path.to_path_buf(), line_of(source, offset))
        })?;
        raw.insert(key.to_string(), v.clone());
    }

    let name = raw.get("name").and_then(|v| v.as_str()).map(String::from);

    let materialized = match raw.get("materialized").and_then(|v| v.as_str()) {
        Some(s) => s.parse::<Materialization>().map_err(|_| {
            Error::new(Reason::BadHeader {
                message: format!("invalid `materialized` value `{s}`"),
            })
            .at(path.to_path_buf(), line_of(source, offset))
        })?,
        None => Materialization::default(),
    };

    let unique_key = raw.get("unique_key").map(scalar_or_list).transpose()?;

    if materialized == Materialization::Incremental && unique_key.is_none() {
        return Err(Error::new(Reason::BadHeader {
            message: "`incremental` models require `unique_key`".to_string(),
        })
        .at(path.to_path_buf(), line_of(source, offset)));
    }

    let owner = raw.get("owner").and_then(|v| v.as_str()).map(String::from);
    let schema = raw.get("schema").and_then(|v| v.as_str()).map(String::from);

    let tags = match raw.get("tags") {
        Some(v) => scalar_or_list(v)?,
        None => Vec::new(),
    };

    let tests = match raw.get("tests") {
        Some(YamlValue::Sequence(seq)) => seq
            .iter()
            .map(|entry| parse_test(path, source, offset, entry))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(Error::new(Reason::BadHeader {
                message: "`tests` must be a list".to_string(),
            })
            .at(path.to_path_buf(), line_of(source, offset)))
        }
        None => Vec::new(),
    };

    Ok(Frontmatter {
        name,
        materialized,
        unique_key,
        owner,
        schema,
        tags,
        tests,
        raw,
    })
}

fn scalar_or_list(value: &YamlValue) -> Result<Vec<String>> {
    match value {
        YamlValue::String(s) => Ok(vec![s.clone()]),
        YamlValue::Sequence(seq) => seq
            .iter()
            .map(|v| {
                v.as_str().map(String::from).ok_or_else(|| {
                    Error::new(Reason::BadHeader {
                        message: "expected a string in list".to_string(),
                    })
                })
            })
            .collect(),
        _ => Err(Error::new(Reason::BadHeader {
            message: "expected a string or a list of strings".to_string(),
        })),
    }
}

fn parse_test(path: &Path, source: &str, offset: usize, entry: &YamlValue) -> Result<TestSpec> {
    let mapping = entry.as_mapping().ok_or_else(|| {
        Error::new(Reason::BadHeader {
            message: "each `tests` entry must be a mapping".to_string(),
        })
        .at(path.to_path_buf(), line_of(source, offset))
    })?;

    if let Some(v) = mapping.get(YamlValue::String("unique".to_string())) {
        return Ok(TestSpec::Unique(scalar_or_list(v)?));
    }
    if let Some(v) = mapping.get(YamlValue::String("not_null".to_string())) {
        return Ok(TestSpec::NotNull(scalar_or_list(v)?));
    }
    if let Some(v) = mapping.get(YamlValue::String("accepted_values".to_string())) {
        let inner = v.as_mapping().ok_or_else(|| {
            Error::new(Reason::BadHeader {
                message: "`accepted_values` must be a mapping".to_string(),
            })
        })?;
        let column = inner
            .get(YamlValue::String("column".to_string()))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::new(Reason::BadHeader {
                    message: "`accepted_values` requires a `column`".to_string(),
                })
            })?
            .to_string();
        let values = inner
            .get(YamlValue::String("values".to_string()))
            .and_then(|v| v.as_sequence())
            .cloned()
            .ok_or_else(|| {
                Error::new(Reason::BadHeader {
                    message: "`accepted_values` requires a `values` list".to_string(),
                })
            })?;
        return Ok(TestSpec::AcceptedValues { column, values });
    }

    Err(Error::new(Reason::BadHeader {
        message: "unrecognized test kind, expected one of unique/not_null/accepted_values"
            .to_string(),
    })
    .at(path.to_path_buf(), line_of(source, offset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn p() -> PathBuf {
        PathBuf::from("models/staging/stg_orders.sql")
    }

    #[test]
    fn no_header_defaults_everything() {
        let src = "select * from foo";
        let scanned = scan(&p(), src).unwrap();
        assert_eq!(scanned.frontmatter.materialized, Materialization::View);
        assert_eq!(scanned.body, src);
    }

    #[test]
    fn parses_recognized_keys() {
        let src = "/*---\nmaterialized: table\nowner: data-eng\ntags: [pii, daily]\n---*/\nselect 1";
        let scanned = scan(&p(), src).unwrap();
        assert_eq!(scanned.frontmatter.materialized, Materialization::Table);
        assert_eq!(scanned.frontmatter.owner.as_deref(), Some("data-eng"));
        assert_eq!(scanned.frontmatter.tags, vec!["pii", "daily"]);
        assert_eq!(scanned.body, "\nselect 1");
    }

    #[test]
    fn unclosed_header_is_bad_header() {
        let src = "/*---\nmaterialized: view\nselect 1";
        let err = scan(&p(), src).unwrap_err();
        assert!(matches!(err.reason, Reason::BadHeader { .. }));
    }

    #[test]
    fn incremental_requires_unique_key() {
        let src = "/*---\nmaterialized: incremental\n---*/\nselect 1";
        let err = scan(&p(), src).unwrap_err();
        assert!(matches!(err.reason, Reason::BadHeader { .. }));
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let src = "/*---\ncustom_flag: true\n---*/\nselect 1";
        let scanned = scan(&p(), src).unwrap();
        assert!(scanned.frontmatter.raw.contains_key("custom_flag"));
    }
}
