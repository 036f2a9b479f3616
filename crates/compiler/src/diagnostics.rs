//! Diagnostics for the RazorForge compiler
//!
//! Every phase accumulates [`Diagnostic`] values into a list instead of
//! returning early. The formatter renders a human-readable report with a
//! gutter-numbered source excerpt and caret underline; [`Diagnostic`] also
//! serializes to a structured record for LSP consumers.
//!
//! Error codes are stable identifiers grouped by phase:
//! `EL###` lexer, `EP###` parser, `ES###` semantic, `EG###` codegen.

use crate::span::Span;
use serde::Serialize;
use std::fmt::Write as _;

/// Stable error codes, grouped by phase.
pub mod codes {
    // Lexer
    pub const UNTERMINATED_TEXT: &str = "EL001";
    pub const UNTERMINATED_LETTER: &str = "EL002";
    pub const INVALID_ESCAPE: &str = "EL003";
    pub const INVALID_NUMERIC_LITERAL: &str = "EL004";
    pub const UNKNOWN_SUFFIX: &str = "EL005";
    pub const INVALID_UNICODE_ESCAPE: &str = "EL006";
    pub const UNEXPECTED_CHARACTER: &str = "EL007";
    pub const INCONSISTENT_INDENTATION: &str = "EL008";

    // Parser
    pub const UNEXPECTED_TOKEN: &str = "EP001";
    pub const EXPECTED_TOKEN: &str = "EP002";
    pub const EXPECTED_EXPRESSION: &str = "EP003";
    pub const EXPECTED_STATEMENT: &str = "EP004";
    pub const EXPECTED_DECLARATION: &str = "EP005";
    pub const EXPECTED_TYPE: &str = "EP006";
    pub const EXPECTED_IDENTIFIER: &str = "EP007";
    pub const EXPECTED_PATTERN: &str = "EP008";
    pub const INVALID_LITERAL: &str = "EP009";
    pub const INDENTATION_ERROR: &str = "EP010";

    // Semantic
    pub const UNDEFINED_VARIABLE: &str = "ES001";
    pub const UNDEFINED_FUNCTION: &str = "ES002";
    pub const UNDEFINED_TYPE: &str = "ES003";
    pub const TYPE_MISMATCH: &str = "ES004";
    pub const DUPLICATE_DEFINITION: &str = "ES005";
    pub const INVALID_OPERATION: &str = "ES006";
    pub const MISSING_RETURN: &str = "ES007";
    pub const NON_EXHAUSTIVE_MATCH: &str = "ES008";
    pub const CIRCULAR_DEPENDENCY: &str = "ES009";
    pub const MODULE_NOT_FOUND: &str = "ES010";
    pub const INVALID_ARGUMENTS: &str = "ES011";
    pub const ACCESS_VIOLATION: &str = "ES012";
    pub const MEMORY_ERROR: &str = "ES013";
    pub const GENERIC_ARGS_REQUIRED: &str = "ES014";

    // Codegen
    pub const UNSUPPORTED_FEATURE: &str = "EG001";
    pub const INTERNAL_ERROR: &str = "EG002";
    pub const TARGET_ERROR: &str = "EG003";
    pub const TYPE_RESOLUTION_FAILED: &str = "EG004";
    pub const UNKNOWN_TYPE: &str = "EG005";
    pub const GENERIC_TEMPLATE_ARGS: &str = "EG006";
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hint,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Convert to LSP DiagnosticSeverity number
    pub fn to_lsp_severity(&self) -> u32 {
        match self {
            Severity::Fatal | Severity::Error => 1,
            Severity::Warning => 2,
            Severity::Hint => 4,
        }
    }

    /// True for Error and Fatal, anything that blocks executable output.
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error | Severity::Fatal)
    }

    fn label(&self) -> &'static str {
        match self {
            Severity::Hint => "hint",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

/// A secondary location attached to a diagnostic (e.g. "first defined here").
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Related {
    pub label: String,
    pub span: Span,
}

/// One frame of compiler context ("while analyzing routine 'main'").
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackFrame {
    pub description: String,
    pub span: Span,
}

/// A single compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Stable code, e.g. "ES005"
    pub code: &'static str,
    pub severity: Severity,
    pub span: Span,
    pub message: String,
    /// Optional suggested fix shown below the excerpt
    pub hint: Option<String>,
    /// Secondary locations
    pub related: Vec<Related>,
    /// Compiler stack at the point the diagnostic was raised
    pub stack: Vec<StackFrame>,
}

impl Diagnostic {
    pub fn new(code: &'static str, severity: Severity, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            severity,
            span,
            message: message.into(),
            hint: None,
            related: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub fn error(code: &'static str, span: Span, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, span, message)
    }

    pub fn warning(code: &'static str, span: Span, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warning, span, message)
    }

    pub fn fatal(code: &'static str, span: Span, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Fatal, span, message)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_related(mut self, label: impl Into<String>, span: Span) -> Self {
        self.related.push(Related {
            label: label.into(),
            span,
        });
        self
    }

    pub fn with_frame(mut self, description: impl Into<String>, span: Span) -> Self {
        self.stack.push(StackFrame {
            description: description.into(),
            span,
        });
        self
    }

    /// Structured record for LSP consumers.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// True when any diagnostic blocks executable emission.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity.is_error())
}

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_CYAN: &str = "\x1b[36m";
const ANSI_BLUE: &str = "\x1b[34m";

/// Renders diagnostics as human-readable text.
pub struct DiagnosticFormatter {
    /// Emit ANSI color codes
    pub color: bool,
    /// Source lines shown above the primary line
    pub context_lines: usize,
}

impl Default for DiagnosticFormatter {
    fn default() -> Self {
        DiagnosticFormatter {
            color: false,
            context_lines: 2,
        }
    }
}

impl DiagnosticFormatter {
    pub fn new(color: bool) -> Self {
        DiagnosticFormatter {
            color,
            ..Self::default()
        }
    }

    fn severity_color(&self, severity: Severity) -> &'static str {
        if !self.color {
            return "";
        }
        match severity {
            Severity::Hint => ANSI_CYAN,
            Severity::Warning => ANSI_YELLOW,
            Severity::Error | Severity::Fatal => ANSI_RED,
        }
    }

    fn reset(&self) -> &'static str {
        if self.color { ANSI_RESET } else { "" }
    }

    fn bold(&self) -> &'static str {
        if self.color { ANSI_BOLD } else { "" }
    }

    fn blue(&self) -> &'static str {
        if self.color { ANSI_BLUE } else { "" }
    }

    /// Format one diagnostic against the text of the file its span points at.
    ///
    /// `source` must be the full text of `diagnostic.span.file`; related
    /// locations in other files are rendered as location lines only.
    pub fn format(&self, diagnostic: &Diagnostic, source: &str) -> String {
        let mut out = String::new();
        let color = self.severity_color(diagnostic.severity);

        // Header: [CODE] severity: message
        let _ = writeln!(
            &mut out,
            "{}{}[{}] {}: {}{}",
            self.bold(),
            color,
            diagnostic.code,
            diagnostic.severity.label(),
            diagnostic.message,
            self.reset()
        );

        // Location arrow
        let _ = writeln!(&mut out, "  {}-->{} {}", self.blue(), self.reset(), diagnostic.span);

        self.write_excerpt(&mut out, &diagnostic.span, source, color);

        if let Some(hint) = &diagnostic.hint {
            let _ = writeln!(&mut out, "  {}={} hint: {}", self.blue(), self.reset(), hint);
        }

        for related in &diagnostic.related {
            let _ = writeln!(
                &mut out,
                "  {}={} {}: {}",
                self.blue(),
                self.reset(),
                related.label,
                related.span
            );
        }

        for frame in &diagnostic.stack {
            let _ = writeln!(
                &mut out,
                "  {}={} {} at {}",
                self.blue(),
                self.reset(),
                frame.description,
                frame.span
            );
        }

        out
    }

    /// Format a whole batch, separated by blank lines.
    pub fn format_all(&self, diagnostics: &[Diagnostic], source: &str) -> String {
        diagnostics
            .iter()
            .map(|d| self.format(d, source))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Gutter-numbered excerpt with a caret underline on the primary line.
    fn write_excerpt(&self, out: &mut String, span: &Span, source: &str, color: &str) {
        let lines: Vec<&str> = source.lines().collect();
        if span.start_line == 0 || span.start_line > lines.len() {
            return;
        }

        let first = span.start_line.saturating_sub(self.context_lines).max(1);
        let last = span.start_line;
        let gutter = last.to_string().len().max(2);

        let _ = writeln!(out, "{:width$} {}|{}", "", self.blue(), self.reset(), width = gutter);
        for line_no in first..=last {
            let text = lines.get(line_no - 1).copied().unwrap_or("");
            let _ = writeln!(
                out,
                "{:>width$} {}|{} {}",
                line_no,
                self.blue(),
                self.reset(),
                text,
                width = gutter
            );
        }

        // Caret underline under the primary line
        let caret_len = if span.end_line == span.start_line {
            (span.end_column.saturating_sub(span.start_column)).max(1)
        } else {
            1
        };
        let _ = writeln!(
            out,
            "{:width$} {}|{} {}{}{}{}",
            "",
            self.blue(),
            self.reset(),
            " ".repeat(span.start_column.saturating_sub(1)),
            color,
            "^".repeat(caret_len),
            self.reset(),
            width = gutter
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_span() -> Span {
        Span::range("main.rf", 3, 9, 30, 3, 14, 35)
    }

    #[test]
    fn test_header_and_location() {
        let diag = Diagnostic::error(codes::UNDEFINED_VARIABLE, sample_span(), "undefined variable 'count'");
        let source = "routine main() {\n    let x = 1\n    let y = count\n}\n";
        let text = DiagnosticFormatter::default().format(&diag, source);

        assert!(text.contains("[ES001] error: undefined variable 'count'"));
        assert!(text.contains("--> main.rf:3:9"));
    }

    #[test]
    fn test_excerpt_has_gutter_and_caret() {
        let diag = Diagnostic::error(codes::UNDEFINED_VARIABLE, sample_span(), "undefined variable");
        let source = "routine main() {\n    let x = 1\n    let y = count\n}\n";
        let text = DiagnosticFormatter::default().format(&diag, source);

        // Context lines plus the primary line, gutter-numbered
        assert!(text.contains(" 1 | routine main() {"));
        assert!(text.contains(" 3 |     let y = count"));
        assert!(text.contains("^^^^^"));
    }

    #[test]
    fn test_hint_and_related() {
        let first = Span::range("main.rf", 1, 9, 8, 1, 12, 11);
        let diag = Diagnostic::error(codes::DUPLICATE_DEFINITION, sample_span(), "duplicate definition of 'foo'")
            .with_hint("rename one of the definitions")
            .with_related("first defined here", first);
        let text = DiagnosticFormatter::default().format(&diag, "");

        assert!(text.contains("hint: rename one of the definitions"));
        assert!(text.contains("first defined here: main.rf:1:9"));
    }

    #[test]
    fn test_color_wraps_header() {
        let diag = Diagnostic::error(codes::UNDEFINED_VARIABLE, sample_span(), "boom");
        let text = DiagnosticFormatter::new(true).format(&diag, "");
        assert!(text.contains("\x1b[31m"));
        assert!(text.contains("\x1b[0m"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Fatal > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Hint);
        assert_eq!(Severity::Fatal.to_lsp_severity(), 1);
        assert_eq!(Severity::Hint.to_lsp_severity(), 4);
    }

    #[test]
    fn test_has_errors() {
        let warn = Diagnostic::warning(codes::TYPE_MISMATCH, sample_span(), "w");
        assert!(!has_errors(&[warn.clone()]));
        let err = Diagnostic::error(codes::TYPE_MISMATCH, sample_span(), "e");
        assert!(has_errors(&[warn, err]));
    }

    #[test]
    fn test_machine_readable_record() {
        let diag = Diagnostic::error(codes::UNDEFINED_TYPE, sample_span(), "unknown type 'Foo'")
            .with_hint("did you mean 'Food'?");
        let json = diag.to_json();
        assert!(json.contains("\"code\":\"ES003\""));
        assert!(json.contains("\"severity\":\"error\""));
        assert!(json.contains("did you mean"));
    }
}
