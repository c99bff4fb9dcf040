//! Error taxonomy for the compilation pipeline.
//!
//! Mirrors the shape of a diagnostics-first compiler error: a `Span` into the
//! offending source, a `Reason` naming which pipeline stage raised it, and an
//! optional human hint. `Display` renders a single-line `file:line:column:
//! message` form per spec; a richer multi-line rendering is available via
//! [`Error::to_report`] for interactive tools.

use std::fmt;
use std::path::{Path, PathBuf};

use ariadne::{Label, Report, ReportKind, Source};

const MAX_INLINE_VALUE: usize = 200;

/// Byte offsets into a single source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// 1-based line/column, as produced by the lexer while it scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Why a particular pipeline stage failed. One variant per distinct failure
/// mode across the pipeline.
#[derive(Debug, Clone)]
pub enum Reason {
    BadHeader {
        message: String,
    },
    DuplicateModel {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    UnresolvedRef {
        from: String,
        reference: String,
    },
    CycleDetected {
        path: Vec<String>,
    },
    LexError {
        kind: LexErrorKind,
    },
    ParseError {
        message: String,
    },
    UnmatchedBlock {
        kind: &'static str,
    },
    EvalError {
        expression: String,
        message: String,
    },
    RegistryError {
        namespace: String,
        first: PathBuf,
    },
    CannotIterate {
        type_name: String,
    },
    DatabaseError {
        message: String,
    },
    Timeout,
    Cancelled,
    ExtractError {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    UnclosedExpr,
    UnclosedStmt,
}

/// A single diagnostic. `file` is optional because some errors (registry
/// duplicates, cycle detection) aren't anchored to one file.
#[derive(Debug, Clone)]
pub struct Error {
    pub file: Option<PathBuf>,
    pub position: Option<Position>,
    pub span: Option<Span>,
    pub reason: Reason,
    pub help: Option<String>,
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error {
            file: None,
            position: None,
            span: None,
            reason,
            help: None,
        }
    }

    pub fn at(mut self, file: impl Into<PathBuf>, position: Position) -> Self {
        self.file = Some(file.into());
        self.position = Some(position);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    fn reason_text(&self) -> String {
        match &self.reason {
            Reason::BadHeader { message } => format!("malformed header: {message}"),
            Reason::DuplicateModel { name, first, second } => format!(
                "duplicate model `{name}` defined in {} and {}",
                first.display(),
                second.display()
            ),
            Reason::UnresolvedRef { from, reference } => {
                format!("`{from}` references unknown model `{reference}`")
            }
            Reason::CycleDetected { path } => {
                format!("dependency cycle: {}", path.join(" -> "))
            }
            Reason::LexError { kind } => match kind {
                LexErrorKind::UnclosedExpr => "unclosed `{{` expression".to_string(),
                LexErrorKind::UnclosedStmt => "unclosed `{*` statement".to_string(),
            },
            Reason::ParseError { message } => message.clone(),
            Reason::UnmatchedBlock { kind } => format!("unmatched `{kind}` block"),
            Reason::EvalError { expression, message } => {
                format!("{message} (in `{}`)", truncate(expression))
            }
            Reason::RegistryError { namespace, first } => format!(
                "macro namespace `{namespace}` already registered by {}",
                first.display()
            ),
            Reason::CannotIterate { type_name } => {
                format!("value of type `{type_name}` is not iterable")
            }
            Reason::DatabaseError { message } => message.clone(),
            Reason::Timeout => "model execution timed out".to_string(),
            Reason::Cancelled => "build cancelled".to_string(),
            Reason::ExtractError { message } => format!("lineage extraction failed: {message}"),
        }
    }

    /// Render as an `ariadne` report for a terminal / editor.
    pub fn to_report(&self, source_name: &str, source: &str) -> Option<String> {
        let span = self.span?;
        let mut buf = Vec::new();
        Report::build(ReportKind::Error, source_name, span.start)
            .with_message(self.reason_text())
            .with_label(Label::new((source_name, span.start..span.end)))
            .finish()
            .write((source_name, Source::from(source)), &mut buf)
            .ok()?;
        String::from_utf8(buf).ok()
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_INLINE_VALUE {
        let head: String = s.chars().take(MAX_INLINE_VALUE).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            if let Some(pos) = self.position {
                write!(f, "{}:{}: ", file.display(), pos)?;
            } else {
                write!(f, "{}: ", file.display())?;
            }
        }
        write!(f, "{}", self.reason_text())
    }
}

impl std::error::Error for Error {}

/// A non-empty collection of diagnostics, the unit build passes report in.
#[derive(Debug, Clone, Default)]
pub struct Errors(pub Vec<Error>);

impl Errors {
    pub fn push(&mut self, error: Error) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Error> for Errors {
    fn from(e: Error) -> Self {
        Errors(vec![e])
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn file_stem_or(path: &Path, fallback: &str) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| fallback.to_string())
}
