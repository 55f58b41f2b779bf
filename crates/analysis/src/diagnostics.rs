//! Diagnostics produced by the analyzer
//!
//! Findings about analyzed code are accumulated as values and never halt
//! analysis. Analyzer-level failures (cancellation, malformed input) are
//! the separate [`AnalysisError`] type.

use crate::ast::SourceLoc;
use serde::Serialize;

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Convert to LSP DiagnosticSeverity number
    pub fn to_lsp_severity(&self) -> u32 {
        match self {
            Severity::Error => 1,
            Severity::Warning => 2,
            Severity::Info => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// What a diagnostic is about
///
/// Definite findings carry severity `error`, `Possible*` findings carry
/// `warning`, and the advisory kinds carry `info`. `Timeout` and
/// `InternalError` mark functions whose analysis degraded to the
/// conservative top summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    NullDereference,
    PossibleNullDereference,
    DivByZero,
    PossibleDivByZero,
    OutOfBounds,
    PossibleOutOfBounds,
    UnreachableCode,
    ReturnTypeMismatch,
    Timeout,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NullDereference => "null-dereference",
            ErrorKind::PossibleNullDereference => "possible-null-dereference",
            ErrorKind::DivByZero => "div-by-zero",
            ErrorKind::PossibleDivByZero => "possible-div-by-zero",
            ErrorKind::OutOfBounds => "out-of-bounds",
            ErrorKind::PossibleOutOfBounds => "possible-out-of-bounds",
            ErrorKind::UnreachableCode => "unreachable-code",
            ErrorKind::ReturnTypeMismatch => "return-type-mismatch",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InternalError => "internal-error",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::NullDereference | ErrorKind::DivByZero | ErrorKind::OutOfBounds => {
                Severity::Error
            }
            ErrorKind::PossibleNullDereference
            | ErrorKind::PossibleDivByZero
            | ErrorKind::PossibleOutOfBounds
            | ErrorKind::Timeout
            | ErrorKind::InternalError => Severity::Warning,
            ErrorKind::UnreachableCode | ErrorKind::ReturnTypeMismatch => Severity::Info,
        }
    }
}

/// A single finding at a program point
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    /// Function the finding was reported in
    pub function: String,
    pub loc: SourceLoc,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: impl Into<String>, function: &str, loc: SourceLoc) -> Self {
        Diagnostic {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            function: function.to_string(),
            loc,
        }
    }
}

/// Sort by source location, then kind, then message, and drop duplicates.
/// The result is the deterministic ordering promised to callers.
pub fn sort_diagnostics(diagnostics: &mut Vec<Diagnostic>) {
    diagnostics.sort_by(|a, b| {
        (&a.loc, a.kind, &a.message)
            .cmp(&(&b.loc, b.kind, &b.message))
    });
    diagnostics.dedup_by(|a, b| a.loc == b.loc && a.kind == b.kind && a.message == b.message);
}

/// Format diagnostics for CLI output
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut output = String::new();
    for d in diagnostics {
        output.push_str(&format!(
            "{}: {} [{}]: {}\n",
            d.loc,
            d.severity.as_str(),
            d.kind.as_str(),
            d.message
        ));
    }
    output
}

/// Render diagnostics as a JSON array for machine consumers
pub fn diagnostics_to_json(diagnostics: &[Diagnostic]) -> Result<String, String> {
    #[derive(Serialize)]
    struct Row<'a> {
        file: String,
        line: usize,
        column: usize,
        severity: &'a str,
        kind: &'a str,
        function: &'a str,
        message: &'a str,
    }

    let rows: Vec<Row<'_>> = diagnostics
        .iter()
        .map(|d| Row {
            file: d.loc.file.display().to_string(),
            line: d.loc.line + 1,
            column: d.loc.column + 1,
            severity: d.severity.as_str(),
            kind: d.kind.as_str(),
            function: &d.function,
            message: &d.message,
        })
        .collect();

    serde_json::to_string_pretty(&rows).map_err(|e| format!("Failed to serialize diagnostics: {}", e))
}

/// Failures of the analyzer itself, as opposed to findings about the
/// analyzed code
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// The input violated the AST contract. Aborts the entire run.
    MalformedAst(String),
    /// The cancellation token was triggered. Partial results discarded.
    Cancelled,
    /// Per-function wall-clock budget exhausted
    Timeout(String),
    /// A bug or unexpected shape inside the analyzer
    Internal(String),
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::MalformedAst(msg) => write!(f, "malformed AST: {}", msg),
            AnalysisError::Cancelled => write!(f, "analysis cancelled"),
            AnalysisError::Timeout(func) => write!(f, "analysis of '{}' timed out", func),
            AnalysisError::Internal(msg) => write!(f, "internal analyzer error: {}", msg),
        }
    }
}

impl std::error::Error for AnalysisError {}
