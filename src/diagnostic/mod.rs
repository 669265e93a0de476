pub mod ansi;
pub mod json;
pub mod registry;

use crate::bytecode::serial::ChunkFormatError;
use crate::compiler::CompileError;
use crate::lexer::LexError;
use crate::parser::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Where a diagnostic points: a file plus 1-based line/column. Errors in
/// included files carry the included file's name and local line, courtesy
/// of the origin map.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub loc: Option<SourceLoc>,
    /// The offending source line, rendered under the location.
    pub snippet: Option<String>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            loc: None,
            snippet: None,
            notes: Vec::new(),
            suggestion: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Warning, ..Diagnostic::error(message) }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

// Error families carry their own positions in expanded-text coordinates;
// the driver re-anchors them through the origin map via `.at(...)`.

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let mut d = Diagnostic::error(&e.message).with_code(e.code);
        if let Some(hint) = &e.hint {
            d = d.with_suggestion(hint.clone());
        }
        d
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        let mut d = Diagnostic::error(&e.message)
            .with_code(e.code)
            .with_note(format!("near '{}'", e.near));
        if let Some(hint) = &e.hint {
            d = d.with_suggestion(hint.clone());
        }
        d
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code)
    }
}

impl From<&ChunkFormatError> for Diagnostic {
    fn from(e: &ChunkFormatError) -> Self {
        let code = match e {
            ChunkFormatError::BadMagic => "CAT-I001",
            ChunkFormatError::Truncated
            | ChunkFormatError::BadConstTag(_)
            | ChunkFormatError::BadString => "CAT-I002",
            ChunkFormatError::Io(_) => "CAT-I003",
        };
        Diagnostic::error(e.to_string()).with_code(code)
    }
}
