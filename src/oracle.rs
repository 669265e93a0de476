//! The suggestion oracle consulted when a statement fails to parse.
//!
//! The oracle lives outside the core: word-level syntax is easy to get
//! subtly wrong (`band a b` instead of `band a and b`), and a pluggable
//! collaborator can propose a rewritten statement. Known rewrites include
//! inserting `and` between `band`/`bor`/`bxor` arguments, `by` before
//! shift amounts, `with` between a call name and its arguments (turning
//! commas into `and`), `to` in `set`, and `with` in `replace`.

/// A proposed rewrite for a statement that failed to parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    /// Human-readable description shown to the user.
    pub suggestion: String,
    /// The rewritten statement text, re-parsed when auto-fix is enabled.
    pub fixed: String,
}

pub trait SuggestionOracle {
    fn suggest(&self, statement: &str) -> Option<Fix>;
}

/// The default oracle: proposes nothing.
pub struct NullOracle;

impl SuggestionOracle for NullOracle {
    fn suggest(&self, _statement: &str) -> Option<Fix> {
        None
    }
}
