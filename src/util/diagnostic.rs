//! Bind-time diagnostics.
//!
//! A [`Diagnostic`] is an immutable record produced during a bind pass. It is
//! never mutated after creation; a new bind pass produces a fresh list.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Severity level for diagnostics.
///
/// Errors block the build pipeline; warnings are advisory and never abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// The closed set of diagnostics the binder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// The same top-level name is defined in two units.
    DuplicateIdentifier,
    /// A reference matched no definition, no target global and no intrinsic.
    UndefinedReference,
    /// An export form the bundler cannot rewrite.
    UnsupportedExport,
    /// Mutual dependency dereferenced at module-init time.
    InitCycle,
    /// Mutual dependency that is only dereferenced at runtime.
    RuntimeCycle,
    /// A definition with no references that is not exported.
    UnusedDefinition,
}

impl DiagnosticKind {
    /// Stable diagnostic code, as emitted in reports.
    pub fn code(&self) -> &'static str {
        match self {
            DiagnosticKind::DuplicateIdentifier => "E_SYN_DUPID",
            DiagnosticKind::UndefinedReference => "E_REFUNDEF",
            DiagnosticKind::UnsupportedExport => "E_SYN_BADEXPORT",
            DiagnosticKind::InitCycle => "E_MUTDEP",
            DiagnosticKind::RuntimeCycle => "W_MUTDEP",
            DiagnosticKind::UnusedDefinition => "W_UNUSED",
        }
    }

    /// Whether this kind blocks the build.
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticKind::DuplicateIdentifier
            | DiagnosticKind::UndefinedReference
            | DiagnosticKind::UnsupportedExport
            | DiagnosticKind::InitCycle => Severity::Error,
            DiagnosticKind::RuntimeCycle | DiagnosticKind::UnusedDefinition => Severity::Warning,
        }
    }
}

/// A source location: file, 1-based line, 0-based column.
///
/// A line of 0 means "the file as a whole" (used for cycle diagnostics that
/// have no single originating line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SrcLoc {
    pub file: PathBuf,
    pub line: u32,
    pub col: u32,
}

impl SrcLoc {
    /// A location pointing at a specific line and column.
    pub fn new(file: impl Into<PathBuf>, line: u32, col: u32) -> Self {
        SrcLoc {
            file: file.into(),
            line,
            col,
        }
    }

    /// A location naming a file without a line.
    pub fn file_only(file: impl Into<PathBuf>) -> Self {
        SrcLoc {
            file: file.into(),
            line: 0,
            col: 0,
        }
    }
}

impl fmt::Display for SrcLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.file.display())
        } else {
            // Columns are stored 0-based but reported 1-based.
            write!(f, "{}:{}:{}", self.file.display(), self.line, self.col + 1)
        }
    }
}

/// An immutable diagnostic record.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// What went wrong (or what is suspicious).
    pub kind: DiagnosticKind,
    /// Primary message.
    pub message: String,
    /// Source location, when one exists.
    pub location: Option<SrcLoc>,
    /// Additional detail lines, indented under the message in reports.
    pub details: Vec<String>,
}

impl Diagnostic {
    /// Create a diagnostic with a location.
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, location: SrcLoc) -> Self {
        Diagnostic {
            kind,
            message: message.into(),
            location: Some(location),
            details: Vec::new(),
        }
    }

    /// Create a diagnostic without a location.
    pub fn unlocated(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            message: message.into(),
            location: None,
            details: Vec::new(),
        }
    }

    /// Append a detail line.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    /// Severity of this diagnostic.
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {} ({})", loc, self.message, self.kind.code())?,
            None => write!(f, "{} ({})", self.message, self.kind.code())?,
        }
        for detail in &self.details {
            write!(f, "\n  {}", detail.replace('\n', "\n  "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_formatting() {
        let loc = SrcLoc::new("src/a.js", 3, 0);
        assert_eq!(loc.to_string(), "src/a.js:3:1");

        let whole_file = SrcLoc::file_only("src/a.js");
        assert_eq!(whole_file.to_string(), "src/a.js");
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::new(
            DiagnosticKind::UndefinedReference,
            "`fetch` is not defined",
            SrcLoc::new("net.js", 12, 4),
        )
        .with_detail("Hint: \"browser\" target has fetch");

        let s = d.to_string();
        assert!(s.starts_with("net.js:12:5: `fetch` is not defined (E_REFUNDEF)"));
        assert!(s.contains("\n  Hint: \"browser\" target has fetch"));
    }

    #[test]
    fn test_kind_severity() {
        assert_eq!(DiagnosticKind::InitCycle.severity(), Severity::Error);
        assert_eq!(DiagnosticKind::RuntimeCycle.severity(), Severity::Warning);
        assert_eq!(DiagnosticKind::UnusedDefinition.severity(), Severity::Warning);
    }
}
